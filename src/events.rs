use serde::Serialize;
use uuid::Uuid;

use crate::types::ContactId;

/// Notifications broadcast to the host by [`crate::manager::ContactsManager`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum ManagerEvent {
    /// The first snapshot after start-up has been published.
    AddressBookReady { persons: usize },
    /// A check finished and its views are published.
    ChangeCompleted {
        run_id: Uuid,
        new_contacts: Vec<ContactId>,
    },
    /// Raw records were removed from the source and from the views.
    ContactsDeleted { ids: Vec<ContactId> },
}

impl ManagerEvent {
    /// Stable name for logs and host-side routing.
    pub fn name(&self) -> &'static str {
        match self {
            ManagerEvent::AddressBookReady { .. } => "addressbook_ready",
            ManagerEvent::ChangeCompleted { .. } => "addressbook_change_completed",
            ManagerEvent::ContactsDeleted { .. } => "contacts_deleted",
        }
    }
}
