//! The login stack.
//!
//! Sessions are pushed as they log in and unwound top to bottom. A session
//! higher on the stack may share the transport of the one below it, so the
//! order of log-outs matters.

use std::collections::VecDeque;
use std::sync::Arc;

use cardportal::{Navigator, PageSink};

use crate::config::BankConfig;
use crate::crawler::{Card, CardCrawler, CardHandle, Session, SsoPortal};
use crate::error::{Result, SyncError};

/// A session that can be placed on the login stack.
pub trait LoginSession {
    fn log_in(&mut self) -> Result<()>;
    fn log_out(&mut self) -> Result<()>;
    /// Short label for logs.
    fn describe(&self) -> String;
}

/// Log-out failures swallowed while unwinding.
#[derive(Debug, Default)]
pub struct UnwindReport {
    pub closed: usize,
    pub failures: Vec<(String, SyncError)>,
}

impl UnwindReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

enum State<S> {
    Unentered,
    Entered(Vec<S>),
}

pub struct Manager<S: LoginSession = Session> {
    banks: Vec<BankConfig>,
    sink: Option<Arc<dyn PageSink + Send + Sync>>,
    state: State<S>,
}

impl<S: LoginSession> Manager<S> {
    pub fn new(banks: Vec<BankConfig>) -> Self {
        Self {
            banks,
            sink: None,
            state: State::Unentered,
        }
    }

    /// Every transport this manager creates reports its pages to `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn PageSink + Send + Sync>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn banks(&self) -> &[BankConfig] {
        &self.banks
    }

    pub fn is_entered(&self) -> bool {
        matches!(self.state, State::Entered(_))
    }

    pub fn enter(&mut self) -> Result<()> {
        if self.is_entered() {
            return Err(SyncError::Nesting);
        }
        self.state = State::Entered(Vec::new());
        Ok(())
    }

    fn stack(&self) -> Result<&Vec<S>> {
        match &self.state {
            State::Entered(stack) => Ok(stack),
            State::Unentered => Err(SyncError::NotEntered),
        }
    }

    fn stack_mut(&mut self) -> Result<&mut Vec<S>> {
        match &mut self.state {
            State::Entered(stack) => Ok(stack),
            State::Unentered => Err(SyncError::NotEntered),
        }
    }

    pub fn depth(&self) -> usize {
        self.stack().map(Vec::len).unwrap_or(0)
    }

    pub fn top(&self) -> Option<&S> {
        self.stack().ok().and_then(|s| s.last())
    }

    pub fn top_mut(&mut self) -> Option<&mut S> {
        self.stack_mut().ok().and_then(|s| s.last_mut())
    }

    /// Logs `session` in and places it on top. A failed log-in leaves the stack unchanged.
    pub fn push(&mut self, mut session: S) -> Result<()> {
        let stack = self.stack_mut()?;
        session.log_in()?;
        tracing::debug!("Pushed {} at depth {}", session.describe(), stack.len() + 1);
        stack.push(session);
        Ok(())
    }

    /// Removes the top session and logs it out.
    ///
    /// The session is gone from the stack even when its log-out fails.
    pub fn pop(&mut self) -> Result<Option<String>> {
        let Some(mut session) = self.stack_mut()?.pop() else {
            return Ok(None);
        };
        session.log_out()?;
        Ok(Some(session.describe()))
    }

    /// Logs out every session, top first, and leaves the manager unentered.
    pub fn exit(&mut self) -> UnwindReport {
        let mut report = UnwindReport::default();
        let State::Entered(mut stack) = std::mem::replace(&mut self.state, State::Unentered) else {
            return report;
        };
        while let Some(mut session) = stack.pop() {
            let label = session.describe();
            match session.log_out() {
                Ok(()) => report.closed += 1,
                Err(e) => {
                    tracing::warn!("Log-out of {} failed: {}", label, e);
                    report.failures.push((label, e));
                }
            }
        }
        report
    }

    /// Runs `f` between `enter` and `exit`; the exit happens whatever `f` returns.
    pub fn scope<R>(&mut self, f: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        self.enter()?;
        let result = f(self);
        let report = self.exit();
        if !report.is_clean() {
            tracing::warn!("{} sessions failed to log out", report.failures.len());
        }
        result
    }
}

impl<S: LoginSession> Drop for Manager<S> {
    fn drop(&mut self) {
        if self.is_entered() {
            self.exit();
        }
    }
}

impl Manager<Session> {
    fn navigator(&self) -> Result<Navigator> {
        let mut navigator = Navigator::new()?;
        navigator.set_sink(self.sink.clone());
        Ok(navigator)
    }

    fn top_crawler(&self) -> Result<&CardCrawler> {
        match self.top() {
            Some(Session::Card(crawler)) => Ok(crawler),
            _ => Err(SyncError::Structure("no card session on top of the stack".into())),
        }
    }

    /// Pushes the sessions `bank` needs and returns how many were pushed.
    fn open_bank(&mut self, bank: &BankConfig) -> Result<usize> {
        let Some(sso) = &bank.sso else {
            let crawler = CardCrawler::direct(bank, self.navigator()?)?;
            self.push(Session::Card(crawler))?;
            return Ok(1);
        };

        let portal = SsoPortal::new(sso, self.navigator()?);
        self.push(Session::Portal(portal))?;
        let inner = match self.top() {
            Some(Session::Portal(portal)) => portal.delegate(bank),
            _ => Err(SyncError::Structure("portal session missing".into())),
        };
        match inner.and_then(|crawler| self.push(Session::Card(crawler))) {
            Ok(()) => Ok(2),
            Err(e) => {
                self.close(1);
                Err(e)
            }
        }
    }

    /// Pops `count` sessions, logging failures.
    fn close(&mut self, count: usize) {
        for _ in 0..count {
            match self.pop() {
                Ok(Some(label)) => tracing::debug!("Closed {}", label),
                Ok(None) => break,
                Err(e) => tracing::warn!("Log-out failed: {}", e),
            }
        }
    }

    /// Walks the cards of every configured bank, logging in as it goes.
    pub fn all_cards(&mut self) -> Result<CardWalk<'_>> {
        self.stack()?;
        Ok(CardWalk {
            manager: self,
            next_bank: 0,
            pushed: 0,
            pending: VecDeque::new(),
        })
    }
}

/// Lending cursor over the cards of all banks.
///
/// Each handle borrows the walk, so only one card is open at a time. The
/// sessions of a bank stay on the stack until its last card is passed.
pub struct CardWalk<'m> {
    manager: &'m mut Manager<Session>,
    next_bank: usize,
    pushed: usize,
    pending: VecDeque<Card>,
}

impl CardWalk<'_> {
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<CardHandle<'_>>> {
        loop {
            if let Some(card) = self.pending.pop_front() {
                let crawler = self.manager.top_crawler()?;
                return Ok(Some(CardHandle::new(crawler, card)));
            }

            if self.pushed > 0 {
                self.manager.close(self.pushed);
                self.pushed = 0;
            }
            let Some(bank) = self.manager.banks.get(self.next_bank).cloned() else {
                return Ok(None);
            };
            self.next_bank += 1;

            self.pushed = match self.manager.open_bank(&bank) {
                Ok(pushed) => pushed,
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", bank.bank, e);
                    return Err(e);
                }
            };
            match self.manager.top_crawler().and_then(CardCrawler::cards) {
                Ok(cards) => {
                    tracing::info!("{} cards at {}", cards.len(), bank.bank);
                    self.pending.extend(cards);
                }
                Err(e) => {
                    self.manager.close(self.pushed);
                    self.pushed = 0;
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Fake {
        name: &'static str,
        fail_login: bool,
        fail_logout: bool,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl Fake {
        fn new(name: &'static str, log: &Rc<RefCell<Vec<String>>>) -> Self {
            Self {
                name,
                fail_login: false,
                fail_logout: false,
                log: Rc::clone(log),
            }
        }
    }

    impl LoginSession for Fake {
        fn log_in(&mut self) -> Result<()> {
            self.log.borrow_mut().push(format!("in {}", self.name));
            if self.fail_login {
                return Err(SyncError::Login("bad password".into()));
            }
            Ok(())
        }

        fn log_out(&mut self) -> Result<()> {
            self.log.borrow_mut().push(format!("out {}", self.name));
            if self.fail_logout {
                return Err(SyncError::Structure("no logout link".into()));
            }
            Ok(())
        }

        fn describe(&self) -> String {
            self.name.to_string()
        }
    }

    #[test]
    fn entering_twice_is_a_nesting_error() {
        let mut manager = Manager::<Fake>::new(vec![]);
        manager.enter().unwrap();
        assert!(matches!(manager.enter(), Err(SyncError::Nesting)));
        assert!(manager.is_entered());
        manager.exit();
        assert!(!manager.is_entered());
        manager.enter().unwrap();
    }

    #[test]
    fn push_requires_entry_and_successful_login() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut manager = Manager::<Fake>::new(vec![]);
        assert!(matches!(manager.push(Fake::new("a", &log)), Err(SyncError::NotEntered)));

        manager.enter().unwrap();
        let mut bad = Fake::new("bad", &log);
        bad.fail_login = true;
        assert!(matches!(manager.push(bad), Err(SyncError::Login(_))));
        assert_eq!(manager.depth(), 0);

        manager.push(Fake::new("a", &log)).unwrap();
        assert_eq!(manager.depth(), 1);
        assert_eq!(manager.top().map(|s| s.name), Some("a"));
    }

    #[test]
    fn unwind_continues_past_failing_logout() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut manager = Manager::<Fake>::new(vec![]);
        manager.enter().unwrap();
        manager.push(Fake::new("bottom", &log)).unwrap();
        let mut middle = Fake::new("middle", &log);
        middle.fail_logout = true;
        manager.push(middle).unwrap();
        manager.push(Fake::new("top", &log)).unwrap();

        let report = manager.exit();
        assert_eq!(report.closed, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "middle");
        assert!(!manager.is_entered());
        assert_eq!(
            log.borrow()[3..],
            ["out top", "out middle", "out bottom"].map(String::from)
        );
    }

    #[test]
    fn scope_exits_on_error() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut manager = Manager::<Fake>::new(vec![]);
        let result: Result<()> = manager.scope(|m| {
            m.push(Fake::new("a", &log))?;
            Err(SyncError::Temporary("portal maintenance".into()))
        });
        assert!(matches!(result, Err(SyncError::Temporary(_))));
        assert!(!manager.is_entered());
        assert_eq!(log.borrow().last().map(String::as_str), Some("out a"));
    }

    #[test]
    fn pop_removes_even_when_logout_fails() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut manager = Manager::<Fake>::new(vec![]);
        manager.enter().unwrap();
        let mut s = Fake::new("a", &log);
        s.fail_logout = true;
        manager.push(s).unwrap();
        assert!(manager.pop().is_err());
        assert_eq!(manager.depth(), 0);
        assert!(matches!(manager.pop(), Ok(None)));
    }

    #[test]
    fn dropping_an_entered_manager_logs_out() {
        let log = Rc::new(RefCell::new(Vec::new()));
        {
            let mut manager = Manager::<Fake>::new(vec![]);
            manager.enter().unwrap();
            manager.push(Fake::new("a", &log)).unwrap();
        }
        assert_eq!(log.borrow().as_slice(), ["in a", "out a"]);
    }

    #[test]
    fn walking_cards_needs_an_entered_manager() {
        let mut manager = Manager::<Session>::new(vec![]);
        assert!(matches!(manager.all_cards(), Err(SyncError::NotEntered)));
        manager.enter().unwrap();
        let mut walk = manager.all_cards().unwrap();
        assert!(walk.next().unwrap().is_none());
    }
}
