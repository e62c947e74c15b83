mod controller;
mod game_task;

pub use controller::IceAdapter;
pub use game_task::GameTask;
