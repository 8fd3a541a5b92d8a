use crate::consensus::NodeRole;
use tokio::sync::watch;

pub(super) fn new(initial_role: NodeRole) -> (RoleChangeNotifier, RoleChangeListener) {
    let (snd, rcv) = watch::channel(initial_role);

    (RoleChangeNotifier { snd }, RoleChangeListener { rcv })
}

pub(super) struct RoleChangeNotifier {
    snd: watch::Sender<NodeRole>,
}

impl RoleChangeNotifier {
    pub(super) fn notify_new_role(&self, new_role: NodeRole) {
        let _ = self.snd.send(new_role);
    }
}

/// RoleChangeListener observes the role of the local node without going through the actor.
#[derive(Clone)]
pub struct RoleChangeListener {
    rcv: watch::Receiver<NodeRole>,
}

impl RoleChangeListener {
    pub fn current(&self) -> NodeRole {
        *self.rcv.borrow()
    }

    /// Waits for the next role change. `None` once the node has shut down.
    pub async fn next(&mut self) -> Option<NodeRole> {
        match self.rcv.changed().await {
            Ok(_) => Some(*self.rcv.borrow()),
            Err(_) => None,
        }
    }
}
