pub mod classes;
pub mod core;
pub mod helpers;
pub mod schools;
pub mod students;
pub mod subjects;
pub mod teachers;
