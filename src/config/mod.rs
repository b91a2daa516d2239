mod settings;

pub use settings::{
    ApiConfig, DatabaseConfig, JwtConfig, LogFormat, LoggingConfig, MonitoringConfig,
    ServerConfig, Settings, ShutdownConfig, WebSocketConfig,
};
