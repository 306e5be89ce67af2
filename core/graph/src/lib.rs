//! Navigation over sites, drives and items of the Graph API.
//!
//! [`ResourceNavigator`] sits on top of an
//! [`AuthenticatedSession`](sharegraph_auth::AuthenticatedSession); it never
//! touches token storage itself.

pub mod navigator;
pub mod types;

pub use navigator::ResourceNavigator;
pub use types::{Collection, Drive, DriveItem, FileFacet, FolderFacet, Site, UserProfile};
