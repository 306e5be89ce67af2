//! Site, drive and item navigation.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Response;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use sharegraph_auth::AuthenticatedSession;
use sharegraph_common::{DriveId, Error, ItemId, Result, SiteId};

use crate::types::{Collection, Drive, DriveItem, Site, UserProfile};

/// Characters escaped inside a single path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b':')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

fn segment(value: &str) -> String {
    utf8_percent_encode(value, SEGMENT).to_string()
}

/// Encode a slash-separated path, keeping the separators.
fn encode_path(value: &str) -> String {
    value
        .trim_matches('/')
        .split('/')
        .map(segment)
        .collect::<Vec<_>>()
        .join("/")
}

/// Navigator over one site and its current drive.
///
/// Calls are never retried. A failed call leaves the selection untouched
/// and never writes to token storage.
pub struct ResourceNavigator {
    session: Arc<AuthenticatedSession>,
    api_base: String,
    site_id: Option<SiteId>,
    drives: BTreeMap<String, DriveId>,
    current_drive: Option<DriveId>,
}

impl ResourceNavigator {
    /// Create a navigator rooted at `api_base` (e.g. `https://graph.microsoft.com/v1.0`).
    pub fn new(session: Arc<AuthenticatedSession>, api_base: impl Into<String>) -> Self {
        Self {
            session,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            site_id: None,
            drives: BTreeMap::new(),
            current_drive: None,
        }
    }

    pub fn session(&self) -> &Arc<AuthenticatedSession> {
        &self.session
    }

    /// Resolved site, if any.
    pub fn site_id(&self) -> Option<&SiteId> {
        self.site_id.as_ref()
    }

    /// Selected drive, if any.
    pub fn current_drive(&self) -> Option<&DriveId> {
        self.current_drive.as_ref()
    }

    /// Names of the drives known for the resolved site.
    pub fn drive_names(&self) -> Vec<&str> {
        self.drives.keys().map(String::as_str).collect()
    }

    /// Resolve the id of the site at `domain` and server-relative `site_path`.
    pub async fn resolve_site(&self, domain: &str, site_path: &str) -> Result<SiteId> {
        let url = format!(
            "{}/sites/{}:/{}?$select=id",
            self.api_base,
            segment(domain),
            encode_path(site_path)
        );
        let site: Site = self.fetch(&url).await?;
        Ok(site.id)
    }

    /// Resolve a site and load its drive map.
    ///
    /// The site and drive map are replaced only when both calls succeed; any
    /// previously selected drive is cleared.
    pub async fn set_site(&mut self, domain: &str, site_path: &str) -> Result<&SiteId> {
        let site_id = self.resolve_site(domain, site_path).await?;
        let drives = self.fetch_drives(&site_id).await?;

        info!(site = %site_id, drives = drives.len(), "Site selected");
        self.drives = drives
            .into_iter()
            .map(|drive| (drive.name, drive.id))
            .collect();
        self.current_drive = None;
        let site_id: &SiteId = self.site_id.insert(site_id);
        Ok(site_id)
    }

    /// List drives of the resolved site.
    pub async fn list_drives(&self) -> Result<Vec<Drive>> {
        let site_id = self.site_id.as_ref().ok_or(Error::NoSiteSelected)?;
        self.fetch_drives(site_id).await
    }

    async fn fetch_drives(&self, site_id: &SiteId) -> Result<Vec<Drive>> {
        let url = format!("{}/sites/{}/drives", self.api_base, segment(site_id.as_str()));
        self.fetch_all(url).await
    }

    /// Select the current drive by name.
    ///
    /// # Errors
    /// - `DriveNotFound` if `name` is not in the drive map; the current
    ///   drive is left unchanged
    pub fn select_drive(&mut self, name: &str) -> Result<&DriveId> {
        let id = self
            .drives
            .get(name)
            .cloned()
            .ok_or_else(|| Error::DriveNotFound(name.to_string()))?;
        debug!(drive = name, "Drive selected");
        let id: &DriveId = self.current_drive.insert(id);
        Ok(id)
    }

    fn drive(&self) -> Result<&DriveId> {
        self.current_drive.as_ref().ok_or(Error::NoDriveSelected)
    }

    /// Children of the current drive's root, across all pages.
    pub async fn root_children(&self) -> Result<Vec<DriveItem>> {
        let url = format!(
            "{}/drives/{}/items/root/children",
            self.api_base,
            segment(self.drive()?.as_str())
        );
        self.fetch_all(url).await
    }

    /// Root children of the current drive, name to id.
    pub async fn list_items(&self) -> Result<BTreeMap<String, ItemId>> {
        Ok(by_name(self.root_children().await?, |_| true))
    }

    /// Root folders of the current drive, name to id.
    pub async fn list_folders(&self) -> Result<BTreeMap<String, ItemId>> {
        Ok(by_name(self.root_children().await?, DriveItem::is_folder))
    }

    /// Children of `item_id` in the current drive, across all pages.
    pub async fn list_folder_items(&self, item_id: &ItemId) -> Result<Vec<DriveItem>> {
        let url = format!(
            "{}/drives/{}/items/{}/children",
            self.api_base,
            segment(self.drive()?.as_str()),
            segment(item_id.as_str())
        );
        self.fetch_all(url).await
    }

    /// Folders directly under `item_id`, name to id.
    pub async fn list_subfolders(&self, item_id: &ItemId) -> Result<BTreeMap<String, ItemId>> {
        Ok(by_name(
            self.list_folder_items(item_id).await?,
            DriveItem::is_folder,
        ))
    }

    /// Upload `data` as `name` inside folder `folder` of the current drive.
    ///
    /// `headers` are sent as-is (typically `Content-Type`).
    pub async fn upload(
        &self,
        folder: &ItemId,
        name: &str,
        data: Vec<u8>,
        headers: HeaderMap,
    ) -> Result<DriveItem> {
        let url = format!(
            "{}/drives/{}/items/{}:/{}:/content",
            self.api_base,
            segment(self.drive()?.as_str()),
            segment(folder.as_str()),
            segment(name)
        );
        let size = data.len();
        let response = self.session.put_bytes(&url, data, headers).await?;
        let item: DriveItem = handle_response(response, &url).await?;
        info!(name, size, item = %item.id, "Uploaded file");
        Ok(item)
    }

    /// Profile of the signed-in user.
    pub async fn me(&self) -> Result<UserProfile> {
        let url = format!("{}/me", self.api_base);
        let request_id = uuid::Uuid::new_v4().to_string();

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("client-request-id"),
            HeaderValue::from_str(&request_id)
                .map_err(|e| Error::UnexpectedResponse(e.to_string()))?,
        );
        headers.insert(
            HeaderName::from_static("return-client-request-id"),
            HeaderValue::from_static("true"),
        );

        debug!(request_id = %request_id, "Fetching signed-in user");
        let response = self.session.get_with_headers(&url, headers).await?;
        handle_response(response, &url).await
    }

    async fn fetch<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.session.get(url).await?;
        handle_response(response, url).await
    }

    /// Fetch a collection, following `@odata.nextLink` until the last page.
    async fn fetch_all<T: DeserializeOwned>(&self, url: String) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(url);

        while let Some(url) = next {
            let page: Collection<T> = self.fetch(&url).await?;
            debug!(url = %url, count = page.value.len(), "Fetched page");
            items.extend(page.value);
            next = page.next_link;
        }

        Ok(items)
    }
}

fn by_name(
    items: Vec<DriveItem>,
    keep: impl Fn(&DriveItem) -> bool,
) -> BTreeMap<String, ItemId> {
    items
        .into_iter()
        .filter(|item| keep(item))
        .map(|item| (item.name, item.id))
        .collect()
}

/// Map non-success statuses to `RemoteCallFailed` and parse the body.
async fn handle_response<T: DeserializeOwned>(response: Response, url: &str) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        return Err(Error::RemoteCallFailed {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    response
        .json()
        .await
        .map_err(|e| Error::UnexpectedResponse(format!("{}: {}", url, e)))
}
