pub mod refresh_task;
