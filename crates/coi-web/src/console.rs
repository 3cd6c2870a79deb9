//! `tracing` layer that hands formatted events to a console sink.

use std::fmt;
use std::fmt::Write as _;
use tracing::Event;
use tracing::Level;
use tracing::Subscriber;
use tracing::field::Field;
use tracing::field::Visit;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

/// Forwards events at or above `max_level` verbosity to `sink` as
/// `"target: message key=value ..."` lines.
pub struct ConsoleLayer<W> {
    max_level: Level,
    sink: W,
}

impl<W> ConsoleLayer<W>
where
    W: Fn(Level, &str) + Send + Sync + 'static,
{
    pub fn new(max_level: Level, sink: W) -> Self {
        Self { max_level, sink }
    }
}

impl<S, W> Layer<S> for ConsoleLayer<W>
where
    S: Subscriber,
    W: Fn(Level, &str) + Send + Sync + 'static,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() > self.max_level {
            return;
        }

        let mut line = EventLine::default();
        event.record(&mut line);
        (self.sink)(*metadata.level(), &line.finish(metadata.target()));
    }
}

#[derive(Default)]
struct EventLine {
    message: String,
    fields: String,
}

impl EventLine {
    fn finish(self, target: &str) -> String {
        format!("{target}: {}{}", self.message, self.fields)
    }
}

impl Visit for EventLine {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={value}", field.name());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={value:?}", field.name());
        }
    }
}
