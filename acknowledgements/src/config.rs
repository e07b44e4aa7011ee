use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    /// Delay between the end of one monitor sweep and the start of the next.
    #[envconfig(from = "ACKNOWLEDGEMENT_MONITOR_WAIT", default = "15000")]
    pub monitor_wait: EnvMsDuration,

    /// Upper bound on threads running completion callbacks.
    #[envconfig(from = "ACKNOWLEDGEMENT_CALLBACK_THREADS", default = "2")]
    pub callback_threads: NonZeroUsize,

    #[envconfig(from = "ACKNOWLEDGEMENT_DEFAULT_TIMEOUT", default = "30000")]
    pub default_timeout: EnvMsDuration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            monitor_wait: EnvMsDuration(time::Duration::from_millis(15000)),
            callback_threads: NonZeroUsize::MIN.saturating_add(1),
            default_timeout: EnvMsDuration(time::Duration::from_millis(30000)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}
