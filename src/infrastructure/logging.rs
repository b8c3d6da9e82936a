// Tracing subscriber setup
use crate::infrastructure::config::LoggingSettings;
use tracing_subscriber::EnvFilter;

impl LoggingSettings {
    /// Filter directives for the subscriber. Disabling pipeline logging
    /// silences the `pipeline` target without touching anything else.
    pub fn directives(&self) -> String {
        if self.pipeline {
            self.filter.clone()
        } else {
            format!("{},pipeline=off", self.filter)
        }
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the configured filter.
pub fn init_tracing(settings: &LoggingSettings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.directives()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::pipeline::Pipeline;
    use crate::application::readout::{NumericSink, Readout};
    use crate::infrastructure::config::ReadoutKind;
    use crate::presentation::console_readout::ConsoleReadout;
    use std::io;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Inert;

    impl Readout for Inert {
        fn label(&self) -> &str {
            "inert"
        }
    }

    /// Drive every pipeline component once under `directives` and return
    /// what the subscriber wrote.
    fn run_pipeline_with(directives: &str) -> String {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(directives))
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let pipeline = Pipeline::default();
            pipeline.store().apply_snapshot_text(r#"{"rpm": 1200}"#).unwrap();
            pipeline.store().apply_snapshot_text("garbage").unwrap_err();
            pipeline.accessor().get_double("rpm");

            let reconciler = pipeline.reconcile_loop("console", Duration::from_millis(5));
            let _ = reconciler.register(Arc::new(Inert), "rpm");
            let _ = reconciler.register(Arc::new(Inert), "  ");
            let readout = Arc::new(ConsoleReadout::new("rpm", ReadoutKind::Numeric));
            reconciler.register(readout.clone(), "rpm").unwrap();
            reconciler.tick();
            readout.set_value(f64::NAN).unwrap();
            drop(readout);
            reconciler.tick();
            reconciler.reset();
        });

        let bytes = captured.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_directives() {
        let settings = LoggingSettings {
            filter: "debug".to_string(),
            pipeline: true,
        };
        assert_eq!(settings.directives(), "debug");

        let settings = LoggingSettings {
            pipeline: false,
            ..settings
        };
        assert_eq!(settings.directives(), "debug,pipeline=off");
    }

    #[test]
    fn test_pipeline_switch_silences_every_component() {
        let enabled = LoggingSettings {
            filter: "debug".to_string(),
            pipeline: true,
        };
        let output = run_pipeline_with(&enabled.directives());
        assert!(output.contains("readout has no supported sink"), "{output}");
        assert!(output.contains("console:rpm = 1200"), "{output}");
        assert!(output.contains("snapshot rejected"), "{output}");

        let silenced = LoggingSettings {
            pipeline: false,
            ..enabled
        };
        let output = run_pipeline_with(&silenced.directives());
        assert!(output.is_empty(), "{output}");
    }
}
