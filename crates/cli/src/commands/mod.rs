pub mod list;
pub mod load;
pub mod run;

pub use list::list_command;
pub use load::load_queries;
pub use run::run_command;
