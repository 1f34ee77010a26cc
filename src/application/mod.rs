pub mod assignment_guard;
pub mod bootstrap;
pub mod calendar_sync;
pub mod commands;
pub mod date_window;
pub mod reconciler;
pub mod worklogs;
