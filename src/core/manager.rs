//! Session manager - owns every live session and tracks the active one

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use tracing::{debug, info};

use super::session::{LaunchOptions, Session, SessionError, SessionId, SessionServices};
use super::surface::{Container, Surface};
use crate::config::Config;

/// Notifications collected from sessions during a turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerEvent {
    Disposed(SessionId),
    TitleChanged(SessionId, String),
    ProcessIdReady(SessionId, u32),
}

type EventQueue = Rc<RefCell<Vec<ManagerEvent>>>;

/// Session manager - handles session lifetimes and switching
pub struct SessionManager {
    services: SessionServices,
    config: Config,
    /// Sessions in creation order
    sessions: Vec<Session>,
    active: Option<SessionId>,
    events: EventQueue,
    /// Events drained by `poll` and not yet taken by the owner
    pending: Vec<ManagerEvent>,
}

impl SessionManager {
    pub fn new(services: SessionServices, config: Config) -> Self {
        Self {
            services,
            config,
            sessions: Vec::new(),
            active: None,
            events: Rc::new(RefCell::new(Vec::new())),
            pending: Vec::new(),
        }
    }

    /// Launch a new session and make it active
    pub fn create(&mut self, options: LaunchOptions) -> SessionId {
        let mut session = Session::new(self.services.clone(), &self.config, options);
        let id = session.id();

        let events = self.events.clone();
        let sub = session.on_disposed(move |id| events.borrow_mut().push(ManagerEvent::Disposed(*id)));
        session.add_disposable(sub);

        let events = self.events.clone();
        let sub = session.on_title_changed(move |title| {
            events.borrow_mut().push(ManagerEvent::TitleChanged(id, title.clone()))
        });
        session.add_disposable(sub);

        let events = self.events.clone();
        let sub = session.on_process_id_ready(move |pid| {
            events.borrow_mut().push(ManagerEvent::ProcessIdReady(id, *pid))
        });
        session.add_disposable(sub);

        info!("Created session {}", id);
        self.sessions.push(session);
        self.set_active(id);
        id
    }

    /// Attach a session to its surface
    pub fn attach(&mut self, id: SessionId, container: Container, surface: Box<dyn Surface>) -> Result<(), SessionError> {
        let session = self.get_mut(id).ok_or(SessionError::Disposed)?;
        session.attach(container, surface)
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id() == id)
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.id() == id)
    }

    pub fn active_id(&self) -> Option<SessionId> {
        self.active
    }

    pub fn active(&self) -> Option<&Session> {
        self.active.and_then(|id| self.get(id))
    }

    pub fn active_mut(&mut self) -> Option<&mut Session> {
        let id = self.active?;
        self.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(Session::id).collect()
    }

    /// Make `id` the only visible session
    pub fn set_active(&mut self, id: SessionId) {
        if self.get(id).is_none() {
            return;
        }
        self.active = Some(id);
        for session in &mut self.sessions {
            let visible = session.id() == id;
            if session.is_visible() != visible {
                session.set_visible(visible);
            }
        }
        if let Some(session) = self.active_mut() {
            session.focus(false);
        }
    }

    /// Switch to next session
    pub fn next(&mut self) {
        self.cycle(1);
    }

    /// Switch to previous session
    pub fn prev(&mut self) {
        self.cycle(-1);
    }

    fn cycle(&mut self, step: isize) {
        let Some(active) = self.active else {
            return;
        };
        let Some(pos) = self.sessions.iter().position(|s| s.id() == active) else {
            return;
        };
        let len = self.sessions.len() as isize;
        let next = (pos as isize + step).rem_euclid(len) as usize;
        let id = self.sessions[next].id();
        self.set_active(id);
    }

    /// Dispose the active session
    pub fn kill_active(&mut self) {
        if let Some(session) = self.active_mut() {
            session.dispose();
        }
        self.reap();
    }

    /// Pump every session once, then drop the ones that were torn down.
    ///
    /// Returns whether anything happened.
    pub fn poll(&mut self) -> bool {
        let mut busy = false;
        for session in &mut self.sessions {
            busy |= session.poll();
        }
        busy |= self.reap();
        busy
    }

    /// Move queued session events to `pending` and remove disposed sessions
    fn reap(&mut self) -> bool {
        let events: Vec<ManagerEvent> = self.events.borrow_mut().drain(..).collect();
        if events.is_empty() {
            return false;
        }

        let before = self.sessions.len();
        self.sessions.retain(|s| !s.is_disposed());
        if self.sessions.len() != before {
            debug!("Removed {} disposed session(s)", before - self.sessions.len());
        }

        if self.active.map_or(false, |id| self.get(id).is_none()) {
            self.active = None;
            if let Some(id) = self.sessions.last().map(Session::id) {
                self.set_active(id);
            }
        }
        self.pending.extend(events);
        true
    }

    /// Take the events gathered since the last call
    pub fn drain_events(&mut self) -> Vec<ManagerEvent> {
        std::mem::take(&mut self.pending)
    }

    /// Lay out every session in the same pixel box
    pub fn layout(&mut self, width: f64, height: f64) {
        for session in &mut self.sessions {
            session.layout(width, height);
        }
    }

    pub fn update_config(&mut self, config: &Config) {
        self.config = config.clone();
        for session in &mut self.sessions {
            session.update_config(config);
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn dispose_all(&mut self) {
        for session in &mut self.sessions {
            session.dispose();
        }
        self.reap();
    }

    /// Earliest timer deadline across all sessions
    pub fn next_deadline(&self) -> Option<Instant> {
        self.sessions.iter().filter_map(Session::next_deadline).min()
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.dispose_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use crate::core::env::ShellDescriptor;
    use crate::core::keybinding::KeybindingTable;
    use crate::core::notify::LogNotifier;
    use crate::core::pty::{self, LaunchConfig, ProcessMessage, ProcessRequest, ProcessSpawner, ShellProcess};
    use crate::core::session::SessionContext;
    use crate::core::timer::ManualClock;

    type Inbox = Rc<RefCell<VecDeque<ProcessMessage>>>;

    struct ScriptedProcess(Inbox);

    impl ShellProcess for ScriptedProcess {
        fn send(&mut self, _request: ProcessRequest) -> pty::Result<()> {
            Ok(())
        }
        fn try_recv(&mut self) -> Option<ProcessMessage> {
            self.0.borrow_mut().pop_front()
        }
        fn is_connected(&self) -> bool {
            true
        }
        fn kill(&mut self) {}
    }

    /// Hands out processes whose inboxes the test can fill
    #[derive(Default)]
    struct ScriptedSpawner(RefCell<Vec<Inbox>>);

    impl ProcessSpawner for ScriptedSpawner {
        fn spawn(&self, _launch: &LaunchConfig) -> pty::Result<Box<dyn ShellProcess>> {
            let inbox = Inbox::default();
            self.0.borrow_mut().push(inbox.clone());
            Ok(Box::new(ScriptedProcess(inbox)))
        }
    }

    fn manager() -> (SessionManager, Rc<ScriptedSpawner>) {
        let spawner = Rc::new(ScriptedSpawner::default());
        let services = SessionServices {
            spawner: spawner.clone(),
            notifier: Rc::new(LogNotifier),
            keybindings: Rc::new(KeybindingTable::new()),
            clock: Rc::new(ManualClock::new()),
            context: SessionContext::default(),
        };
        (SessionManager::new(services, Config::default()), spawner)
    }

    fn options() -> LaunchOptions {
        LaunchOptions {
            shell: ShellDescriptor::new("/bin/sh", Vec::new()),
            ..LaunchOptions::default()
        }
    }

    #[test]
    fn test_create_and_switch() {
        let (mut manager, _) = manager();
        let a = manager.create(options());
        let b = manager.create(options());
        let c = manager.create(options());

        assert_eq!(manager.len(), 3);
        assert_eq!(manager.active_id(), Some(c));
        assert!(manager.get(c).unwrap().is_visible());
        assert!(!manager.get(a).unwrap().is_visible());

        manager.next();
        assert_eq!(manager.active_id(), Some(a));
        manager.prev();
        manager.prev();
        assert_eq!(manager.active_id(), Some(b));
        assert!(manager.get(b).unwrap().is_visible());
        assert!(!manager.get(c).unwrap().is_visible());
    }

    #[test]
    fn test_exited_session_is_removed() {
        let (mut manager, spawner) = manager();
        let a = manager.create(options());
        let b = manager.create(options());

        spawner.0.borrow()[1].borrow_mut().push_back(ProcessMessage::Exit(0));
        assert!(manager.poll());

        assert_eq!(manager.ids(), vec![a]);
        assert_eq!(manager.active_id(), Some(a));
        assert_eq!(manager.drain_events(), vec![ManagerEvent::Disposed(b)]);
        assert!(manager.drain_events().is_empty());
    }

    #[test]
    fn test_events_are_tagged_with_session() {
        let (mut manager, spawner) = manager();
        let a = manager.create(options());
        {
            let inboxes = spawner.0.borrow();
            let mut inbox = inboxes[0].borrow_mut();
            inbox.push_back(ProcessMessage::Pid(99));
            inbox.push_back(ProcessMessage::Title("sh".to_string()));
        }
        manager.poll();

        assert_eq!(
            manager.drain_events(),
            vec![
                ManagerEvent::ProcessIdReady(a, 99),
                ManagerEvent::TitleChanged(a, "sh".to_string()),
            ]
        );
    }

    #[test]
    fn test_kill_active_and_dispose_all() {
        let (mut manager, _) = manager();
        let a = manager.create(options());
        let b = manager.create(options());

        manager.kill_active();
        assert_eq!(manager.ids(), vec![a]);
        assert_eq!(manager.active_id(), Some(a));
        assert_eq!(manager.drain_events(), vec![ManagerEvent::Disposed(b)]);

        manager.dispose_all();
        assert!(manager.is_empty());
        assert_eq!(manager.active_id(), None);
    }

    #[test]
    fn test_update_config_reaches_sessions() {
        let (mut manager, _) = manager();
        let a = manager.create(options());

        let mut config = Config::default();
        config.commands_to_skip_shell = vec!["host.quit".to_string()];
        manager.update_config(&config);

        assert_eq!(manager.config(), &config);
        assert_eq!(manager.get(a).unwrap().skip_commands().len(), 1);
    }

    #[test]
    fn test_next_deadline_tracks_launch_window() {
        let (mut manager, _) = manager();
        assert_eq!(manager.next_deadline(), None);
        manager.create(options());
        assert!(manager.next_deadline().is_some());
    }
}
