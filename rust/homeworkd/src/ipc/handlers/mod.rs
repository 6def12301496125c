pub mod backup;
pub mod cache;
pub mod core;
pub mod homework;
pub mod import;
pub mod session;
pub mod setup;
pub mod stats;
pub mod subjects;
pub mod tasks;
pub mod timetable;
