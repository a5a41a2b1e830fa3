//! Server configuration.
//!
//! [`ServerSettings`] holds the static values a host may load from a file;
//! [`ServerConfig`] adds the location rules, which can be swapped while the
//! server runs, and the hook customizing the static resource writer.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{Location, Resource};

pub const DEFAULT_PORT: u16 = 80;

pub type ResourceInjector = Box<dyn Fn(&mut Resource) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerSettings {
    pub port: Option<u16>,
    pub document_root: PathBuf,
    pub index_files: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { port: None, document_root: PathBuf::from("."), index_files: vec!["index.html".to_string()] }
    }
}

pub struct ServerConfig {
    settings: ServerSettings,
    locations: ArcSwapOption<Vec<Location>>,
    not_found_body: Bytes,
    inject_resource: Option<ResourceInjector>,
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::new()
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    pub fn port(&self) -> u16 {
        self.settings.port.unwrap_or(DEFAULT_PORT)
    }

    pub fn document_root(&self) -> &Path {
        &self.settings.document_root
    }

    pub fn index_files(&self) -> &[String] {
        &self.settings.index_files
    }

    /// The current location rules, `None` when none are configured.
    pub fn locations(&self) -> Option<Arc<Vec<Location>>> {
        self.locations.load_full()
    }

    /// Replaces the location rules, requests dispatched afterwards see the new list.
    pub fn set_locations(&self, locations: Vec<Location>) {
        self.locations.store(Some(Arc::new(locations)));
    }

    pub fn clear_locations(&self) {
        self.locations.store(None);
    }

    /// Body of the response sent when no location matches.
    pub fn not_found_body(&self) -> &Bytes {
        &self.not_found_body
    }

    pub(crate) fn inject_resource(&self, resource: &mut Resource) {
        if let Some(inject) = &self.inject_resource {
            inject(resource);
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("settings", &self.settings)
            .field("locations", &self.locations().map(|locations| locations.len()))
            .field("inject_resource", &self.inject_resource.is_some())
            .finish_non_exhaustive()
    }
}

pub struct ServerConfigBuilder {
    settings: ServerSettings,
    locations: Option<Vec<Location>>,
    not_found_body: Bytes,
    inject_resource: Option<ResourceInjector>,
}

impl fmt::Debug for ServerConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfigBuilder")
            .field("settings", &self.settings)
            .field("locations", &self.locations.as_ref().map(Vec::len))
            .finish_non_exhaustive()
    }
}

impl ServerConfigBuilder {
    fn new() -> Self {
        Self { settings: ServerSettings::default(), locations: None, not_found_body: Bytes::new(), inject_resource: None }
    }

    pub fn settings(mut self, settings: ServerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.settings.port = Some(port);
        self
    }

    pub fn document_root(mut self, document_root: impl Into<PathBuf>) -> Self {
        self.settings.document_root = document_root.into();
        self
    }

    pub fn index_files<I, S>(mut self, index_files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.settings.index_files = index_files.into_iter().map(Into::into).collect();
        self
    }

    /// Appends a location rule after the ones already added.
    pub fn location(mut self, location: Location) -> Self {
        self.locations.get_or_insert_with(Vec::new).push(location);
        self
    }

    pub fn locations(mut self, locations: Vec<Location>) -> Self {
        self.locations = Some(locations);
        self
    }

    pub fn not_found_body(mut self, body: impl Into<Bytes>) -> Self {
        self.not_found_body = body.into();
        self
    }

    /// Customizes the static resource writer once, when the server starts.
    pub fn inject_resource<F>(mut self, inject: F) -> Self
    where
        F: Fn(&mut Resource) + Send + Sync + 'static,
    {
        self.inject_resource = Some(Box::new(inject));
        self
    }

    pub fn build(self) -> ServerConfig {
        ServerConfig {
            settings: self.settings,
            locations: ArcSwapOption::new(self.locations.map(Arc::new)),
            not_found_body: self.not_found_body,
            inject_resource: self.inject_resource,
        }
    }
}
