mod root;

pub use root::create_cli_logger;
pub use root::create_root_logger;
