//! Signed-in/signed-out session holder.

use tokio::sync::watch;

use crate::auth::AuthUser;

/// Observable state of the session.
///
/// `epoch` increases on every transition; work started under one epoch must
/// not touch the note cache once the epoch has moved on.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionSnapshot {
    pub signed_in: bool,
    pub user: Option<AuthUser>,
    pub epoch: u64,
}

#[derive(Debug)]
pub struct SessionState {
    tx: watch::Sender<SessionSnapshot>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SessionSnapshot::default());
        Self { tx }
    }

    /// Transition to signed-in and return the new epoch.
    pub fn sign_in(&self, user: AuthUser) -> u64 {
        self.transition(true, Some(user))
    }

    /// Transition to signed-out and return the new epoch.
    pub fn sign_out(&self) -> u64 {
        self.transition(false, None)
    }

    fn transition(&self, signed_in: bool, user: Option<AuthUser>) -> u64 {
        let mut epoch = 0;
        self.tx.send_modify(|snapshot| {
            snapshot.signed_in = signed_in;
            snapshot.user = user;
            snapshot.epoch += 1;
            epoch = snapshot.epoch;
        });
        epoch
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.tx.borrow().clone()
    }

    #[must_use]
    pub fn is_signed_in(&self) -> bool {
        self.tx.borrow().signed_in
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.tx.borrow().epoch
    }

    /// Whether work started under `epoch` may still apply its result.
    #[must_use]
    pub fn is_current(&self, epoch: u64) -> bool {
        let snapshot = self.tx.borrow();
        snapshot.signed_in && snapshot.epoch == epoch
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.tx.subscribe()
    }
}
