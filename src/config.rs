pub use self::parser::{
    Config, DatabaseConfig, DefaultsConfig, LockPolicy, LoggingConfig, RegistrationConfig,
    ScheduleConfig, WebConfig,
};
pub use self::validator::ConfigError;

mod parser;
mod validator;
