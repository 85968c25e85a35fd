//! Change notifications
//!
//! The registry reports create/rename/delete events to an optional
//! collaborator hook after the mutation has committed. Delivery is
//! fire-and-forget: the hook cannot veto or roll back anything, and a
//! missing hook costs nothing.

/// An engine mutation that collaborators may want to observe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    FileCreated { id: u64, name: String },
    FileRenamed { id: u64, old_name: String, new_name: String },
    FileDeleted { id: u64 },
    FileTagged { file: u64, tag: u64 },
    FileUntagged { file: u64, tag: u64 },
    TagCreated { id: u64, name: String },
    TagRenamed { id: u64, old_name: String, new_name: String },
    TagDeleted { id: u64 },
    TagAliased { id: u64, alias: String },
    TagUnaliased { id: u64, alias: String },
}

pub type Notifier = Box<dyn Fn(&ChangeEvent) + Send + Sync>;
