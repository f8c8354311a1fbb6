use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};

use anyhow::bail;

use crate::alarm::model::AlarmId;
use crate::platform::{PopupHost, SystemNotifier};
use crate::settings::{PopupPosition, SettingsStore};

/// Which ring a notification or popup belongs to.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum RingId {
    Alarm(AlarmId),
    Timer,
}

impl fmt::Display for RingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Alarm(id) => write!(f, "{id}"),
            Self::Timer => f.write_str("timer"),
        }
    }
}

impl FromStr for RingId {
    type Err = anyhow::Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if input == "timer" {
            return Ok(Self::Timer);
        }
        match input.parse::<AlarmId>() {
            Ok(id) => Ok(Self::Alarm(id)),
            Err(_) => bail!("invalid ring id '{input}', expected an alarm id or 'timer'"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RingNotice {
    pub id: RingId,
    pub title: String,
    pub body: String,
    pub snooze_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopupRequest {
    pub id: RingId,
    pub title: String,
    pub body: String,
    pub snooze_enabled: bool,
    pub position: PopupPosition,
    /// 0 keeps the popup open until it is dismissed.
    pub duration_seconds: u32,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PopupActionKind {
    Stop,
    Snooze,
}

impl FromStr for PopupActionKind {
    type Err = anyhow::Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "stop" => Ok(Self::Stop),
            "snooze" => Ok(Self::Snooze),
            _ => bail!("unknown popup action '{input}'"),
        }
    }
}

/// A button press coming back from the popup window.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct PopupAction {
    pub id: RingId,
    pub kind: PopupActionKind,
}

/// Delivers rings as system notifications, in-app popups or both,
/// depending on the `notificationType` setting, and collects the popup's
/// stop/snooze actions for the application root to route.
pub struct NotificationBridge {
    settings: Arc<dyn SettingsStore>,
    system: Box<dyn SystemNotifier>,
    popup: Box<dyn PopupHost>,
    active_popup: Option<RingId>,
    actions_tx: Sender<PopupAction>,
    actions_rx: Receiver<PopupAction>,
}

impl NotificationBridge {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        system: Box<dyn SystemNotifier>,
        popup: Box<dyn PopupHost>,
    ) -> Self {
        let (actions_tx, actions_rx) = mpsc::channel();
        Self {
            settings,
            system,
            popup,
            active_popup: None,
            actions_tx,
            actions_rx,
        }
    }

    pub fn notify(&mut self, notice: RingNotice) {
        let settings = self.settings.get();
        let style = settings.notification_type;
        if style.includes_system() {
            self.system.show(&notice.title, &notice.body);
        }
        if style.includes_app() {
            let request = PopupRequest {
                id: notice.id,
                title: notice.title,
                body: notice.body,
                snooze_enabled: notice.snooze_enabled,
                position: settings.notification_position,
                duration_seconds: settings.notification_duration,
            };
            self.popup.show(&request);
            self.active_popup = Some(request.id);
        }
    }

    /// Closes the popup if it is showing the ring `id`.
    pub fn dismiss(&mut self, id: RingId) {
        if self.active_popup == Some(id) {
            self.dismiss_all();
        }
    }

    pub fn dismiss_all(&mut self) {
        if self.active_popup.take().is_some() {
            self.popup.close();
        }
    }

    pub fn active_popup(&self) -> Option<RingId> {
        self.active_popup
    }

    /// Handle for the popup side to send its button presses through.
    pub fn action_sender(&self) -> Sender<PopupAction> {
        self.actions_tx.clone()
    }

    pub fn drain_actions(&mut self) -> Vec<PopupAction> {
        self.actions_rx.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::settings::StoredSettings;
    use crate::store::MemoryStore;

    #[derive(Clone, Default)]
    struct Log {
        lines: Arc<Mutex<Vec<String>>>,
    }

    impl Log {
        fn push(&self, line: String) {
            self.lines.lock().expect("lock").push(line);
        }

        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.lines.lock().expect("lock"))
        }
    }

    impl SystemNotifier for Log {
        fn show(&mut self, title: &str, body: &str) {
            self.push(format!("system {title}: {body}"));
        }
    }

    impl PopupHost for Log {
        fn show(&mut self, request: &PopupRequest) {
            self.push(format!(
                "popup {} {:?} {}s",
                request.id, request.position, request.duration_seconds
            ));
        }

        fn close(&mut self) {
            self.push("close".to_string());
        }
    }

    fn make_bridge(style: &str) -> (Log, NotificationBridge) {
        let settings = StoredSettings::new(Arc::new(MemoryStore::new()));
        settings
            .set("notificationType", json!(style))
            .expect("valid style");
        let log = Log::default();
        let bridge = NotificationBridge::new(
            Arc::new(settings),
            Box::new(log.clone()),
            Box::new(log.clone()),
        );
        (log, bridge)
    }

    fn notice(id: RingId) -> RingNotice {
        RingNotice {
            id,
            title: "Alarm".to_string(),
            body: "Wake up".to_string(),
            snooze_enabled: true,
        }
    }

    #[test]
    fn style_selects_delivery_paths() {
        let (log, mut bridge) = make_bridge("system");
        bridge.notify(notice(RingId::Alarm(1)));
        assert_eq!(log.take(), vec!["system Alarm: Wake up"]);
        assert_eq!(bridge.active_popup(), None);

        let (log, mut bridge) = make_bridge("app");
        bridge.notify(notice(RingId::Alarm(1)));
        assert_eq!(log.take(), vec!["popup 1 BottomRight 30s"]);

        let (log, mut bridge) = make_bridge("both");
        bridge.notify(notice(RingId::Timer));
        assert_eq!(
            log.take(),
            vec!["system Alarm: Wake up", "popup timer BottomRight 30s"]
        );
    }

    #[test]
    fn dismiss_only_closes_matching_popup() {
        let (log, mut bridge) = make_bridge("app");
        bridge.notify(notice(RingId::Alarm(7)));
        log.take();

        bridge.dismiss(RingId::Alarm(8));
        assert!(log.take().is_empty());

        bridge.dismiss(RingId::Alarm(7));
        assert_eq!(log.take(), vec!["close"]);
        bridge.dismiss_all();
        assert!(log.take().is_empty());
    }

    #[test]
    fn actions_arrive_through_sender() {
        let (_, mut bridge) = make_bridge("app");
        let sender = bridge.action_sender();
        sender
            .send(PopupAction {
                id: RingId::Alarm(3),
                kind: PopupActionKind::Snooze,
            })
            .expect("bridge alive");
        let actions = bridge.drain_actions();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, PopupActionKind::Snooze);
        assert!(bridge.drain_actions().is_empty());
    }

    #[test]
    fn parses_ring_ids_and_actions() {
        assert_eq!("timer".parse::<RingId>().expect("timer"), RingId::Timer);
        assert_eq!("42".parse::<RingId>().expect("alarm"), RingId::Alarm(42));
        assert!("nope".parse::<RingId>().is_err());
        assert_eq!(
            "stop".parse::<PopupActionKind>().expect("stop"),
            PopupActionKind::Stop
        );
        assert!("dance".parse::<PopupActionKind>().is_err());
    }
}
