#[derive(clap::ValueEnum, Clone, Debug, Copy)]
pub enum CargoEnv {
    Development,
    Production,
}

#[derive(clap::Parser, Clone, Debug)]
pub struct AppConfig {
    // production or development
    #[clap(long, env, value_enum)]
    pub cargo_env: CargoEnv,

    // port that the app will bind to
    #[clap(long, env, default_value = "5000")]
    pub port: u16,

    // this should be either * for allowing everything, or a comma seperated list of domains like
    // example.com,something.com
    #[clap(long, env, default_value = "*")]
    pub cors_origin: String,

    // optional sentry integration
    #[clap(long, env)]
    pub sentry_dsn: Option<String>,

    // total time allowed for page and resource fetches
    #[clap(long, env, default_value = "15")]
    pub resource_timeout_secs: u64,

    // streamed video gets longer, seeking on slow origins can take a while
    #[clap(long, env, default_value = "30")]
    pub stream_timeout_secs: u64,

    // tcp connect bound, applies to every upstream fetch
    #[clap(long, env, default_value = "10")]
    pub connect_timeout_secs: u64,

    // sent as the referer on page fetches, search urls are built against it too
    #[clap(long, env, default_value = "https://www.google.com/")]
    pub search_engine_home: String,
}

impl Default for AppConfig {
    // used by the tests, the binary always goes through clap
    fn default() -> Self {
        Self {
            cargo_env: CargoEnv::Development,
            port: 5000,
            cors_origin: "*".to_string(),
            sentry_dsn: None,
            resource_timeout_secs: 15,
            stream_timeout_secs: 30,
            connect_timeout_secs: 10,
            search_engine_home: "https://www.google.com/".to_string(),
        }
    }
}
