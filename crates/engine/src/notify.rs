use log::info;

/// User-visibility collaborator, called at major transitions (job start,
/// file start, file completion). The engine behaves identically when these
/// calls are no-ops.
pub trait Notifier: Send + Sync {
    fn start(&self, title: &str, text: &str);
    fn update(&self, title: Option<&str>, text: Option<&str>);
    fn stop(&self);
}

/// Writes notifications through the log
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn start(&self, title: &str, text: &str) {
        info!("▶ {}: {}", title, text);
    }

    fn update(&self, title: Option<&str>, text: Option<&str>) {
        match (title, text) {
            (Some(title), Some(text)) => info!("{}: {}", title, text),
            (Some(title), None) => info!("{}", title),
            (None, Some(text)) => info!("{}", text),
            (None, None) => {}
        }
    }

    fn stop(&self) {
        info!("Run finished");
    }
}

/// Discards all notifications
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn start(&self, _title: &str, _text: &str) {}
    fn update(&self, _title: Option<&str>, _text: Option<&str>) {}
    fn stop(&self) {}
}
