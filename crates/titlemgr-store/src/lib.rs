//! Content store for titlemgr.
//!
//! A [`ContentStore`] keeps installed tickets, pending titles and save data
//! containers under a single root directory. The builders in this crate turn
//! store actions into engine descriptors.

mod actions;
mod error;
mod store;
pub mod ticket;

pub use actions::{
    delete_all_pending_titles, delete_ext_save_data, delete_items, delete_pending_titles,
    delete_system_save_data, delete_tickets, find_ticket_files, install_tickets,
    StoreDeleteBackend, StoreItem, TicketInstallBackend,
};
pub use error::StoreError;
pub use store::{ContentStore, TicketInstall};
