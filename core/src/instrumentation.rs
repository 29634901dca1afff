use std::sync::Once;
use strum::{Display, EnumString};
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn init_instrumentation(format: LogFormat) {
    INIT.call_once(|| {
        #[cfg(debug_assertions)]
        unsafe {
            backtrace_on_stack_overflow::enable();
        };

        // tokio-console takes over the subscriber when TOKIO_CONSOLE_BIND is set
        if std::env::var("TOKIO_CONSOLE_BIND").is_ok() {
            console_subscriber::init();
            return;
        }

        let builder = tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_target(false)
            .with_thread_ids(true)
            .with_level(true);

        let result = match format {
            LogFormat::Text => tracing::subscriber::set_global_default(builder.finish()),
            LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish()),
        };

        if let Err(err) = result {
            eprintln!("Failed to set tracing subscriber: {err}");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use assertables::{assert_err, assert_ok};
    use rstest::rstest;
    use std::str::FromStr;

    #[rstest]
    #[case("text", LogFormat::Text)]
    #[case("json", LogFormat::Json)]
    fn test_log_format_parsing(#[case] input: &str, #[case] expected: LogFormat) {
        let parsed = assert_ok!(LogFormat::from_str(input));
        assert_eq!(parsed, expected);
        assert_eq!(parsed.to_string(), input);
    }

    #[test]
    fn test_unknown_log_format_is_rejected() {
        assert_err!(LogFormat::from_str("xml"));
    }
}
