//! A volatile backend keeping the whole tree in memory.
//!
//! Entries are keyed by their path relative to the mount point, without
//! trailing slash, the root being `/`. Locks live in their own table so that
//! an unmapped path can be locked before it is created.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, SecondsFormat, Utc};
use futures::stream::{self, StreamExt};
use http::Method;

use stratus_dav::encoder::supportedlock;
use stratus_dav::types::{Instruction, PropValue};
use stratus_dav::xml::{Element, Node};

use crate::adapter::Adapter;
use crate::error::{DavError, Result};
use crate::lock::Lock;
use crate::properties::{BatchErrors, Properties};
use crate::resource::{ByteStream, Resource};
use crate::user::User;

const CHUNK_SIZE: usize = 64 * 1024;

const LIVE_FILE: [&str; 8] = [
    "creationdate",
    "displayname",
    "getcontentlength",
    "getcontenttype",
    "getetag",
    "getlastmodified",
    "resourcetype",
    "supportedlock",
];
const LIVE_COLLECTION: [&str; 6] = [
    "creationdate",
    "displayname",
    "getetag",
    "getlastmodified",
    "resourcetype",
    "supportedlock",
];
const LIVE_QUOTA: [&str; 2] = ["quota-available-bytes", "quota-used-bytes"];

#[derive(Debug, Clone)]
struct Entry {
    collection: bool,
    content: Bytes,
    media_type: Option<String>,
    revision: u64,
    created: DateTime<Utc>,
    modified: DateTime<Utc>,
    props: BTreeMap<String, PropValue>,
}

#[derive(Debug)]
struct MemDb {
    entries: RwLock<HashMap<String, Entry>>,
    locks: RwLock<HashMap<String, Vec<Lock>>>,
    revision: AtomicU64,
    quota: Option<u64>,
}

impl MemDb {
    fn entries(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .read()
            .map_err(|_| anyhow!("memory tree lock poisoned").into())
    }

    fn entries_mut(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .write()
            .map_err(|_| anyhow!("memory tree lock poisoned").into())
    }

    fn locks(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Vec<Lock>>>> {
        self.locks
            .read()
            .map_err(|_| anyhow!("memory lock table poisoned").into())
    }

    fn locks_mut(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Vec<Lock>>>> {
        self.locks
            .write()
            .map_err(|_| anyhow!("memory lock table poisoned").into())
    }

    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        self.entries()?
            .get(key)
            .cloned()
            .ok_or_else(|| DavError::ResourceNotFound(key.to_string()))
    }

    fn new_entry(&self, collection: bool) -> Entry {
        let now = Utc::now();
        Entry {
            collection,
            content: Bytes::new(),
            media_type: None,
            revision: self.next_revision(),
            created: now,
            modified: now,
            props: BTreeMap::new(),
        }
    }

    /// Bytes used by the files at or below `key`
    fn used_bytes(entries: &HashMap<String, Entry>, key: &str) -> u64 {
        entries
            .iter()
            .filter(|(k, _)| is_within(k, key))
            .map(|(_, e)| e.content.len() as u64)
            .sum()
    }

    fn check_quota(&self, entries: &HashMap<String, Entry>, released: u64, added: u64) -> Result<()> {
        if let Some(quota) = self.quota {
            let used = Self::used_bytes(entries, "/");
            if used.saturating_sub(released) + added > quota {
                return Err(DavError::InsufficientStorage);
            }
        }
        Ok(())
    }

    fn check_parent(entries: &HashMap<String, Entry>, key: &str) -> Result<()> {
        match parent_key(key) {
            None => Ok(()),
            Some(parent) => match entries.get(parent) {
                Some(e) if e.collection => Ok(()),
                _ => Err(DavError::ResourceTreeNotComplete),
            },
        }
    }
}

/// Relative key of a decoded absolute path
fn key_of(path: &str, base: &str) -> String {
    let rel = path
        .strip_prefix(base.trim_end_matches('/'))
        .unwrap_or(path)
        .trim_end_matches('/');
    match rel.is_empty() {
        true => "/".to_string(),
        false if rel.starts_with('/') => rel.to_string(),
        false => format!("/{}", rel),
    }
}

fn parent_key(key: &str) -> Option<&str> {
    match key.rsplit_once('/') {
        _ if key == "/" => None,
        Some(("", _)) => Some("/"),
        Some((parent, _)) => Some(parent),
        None => None,
    }
}

fn is_within(key: &str, ancestor: &str) -> bool {
    ancestor == "/"
        || key == ancestor
        || key
            .strip_prefix(ancestor)
            .map_or(false, |rest| rest.starts_with('/'))
}

fn guess_media_type(name: &str) -> &'static str {
    let ext = name.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("html") | Some("htm") => "text/html",
        Some("txt") | Some("md") => "text/plain",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("gz") => "application/gzip",
        _ => "application/octet-stream",
    }
}

fn is_write(method: &Method) -> bool {
    !matches!(
        method.as_str(),
        "GET" | "HEAD" | "OPTIONS" | "PROPFIND"
    )
}

// ---- ADAPTER ----

/// In-memory backend, cheap to clone, clones share the same tree
#[derive(Clone)]
pub struct MemoryAdapter {
    db: Arc<MemDb>,
    deny_anonymous_writes: bool,
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::build(None, false)
    }

    /// Refuse writes beyond `quota` bytes with `InsufficientStorage`
    pub fn with_quota(quota: u64) -> Self {
        Self::build(Some(quota), false)
    }

    pub fn deny_anonymous_writes(mut self, deny: bool) -> Self {
        self.deny_anonymous_writes = deny;
        self
    }

    fn build(quota: Option<u64>, deny_anonymous_writes: bool) -> Self {
        let db = MemDb {
            entries: RwLock::new(HashMap::new()),
            locks: RwLock::new(HashMap::new()),
            revision: AtomicU64::new(0),
            quota,
        };
        let root = db.new_entry(true);
        if let Ok(mut entries) = db.entries.write() {
            entries.insert("/".to_string(), root);
        }
        Self {
            db: Arc::new(db),
            deny_anonymous_writes,
        }
    }

    fn handle(&self, path: &str, base: &str, collection: bool) -> MemoryResource {
        MemoryResource {
            db: self.db.clone(),
            base: base.to_string(),
            key: key_of(path, base),
            collection_hint: collection,
        }
    }
}

#[async_trait]
impl Adapter for MemoryAdapter {
    async fn compliance_classes(&self, _path: &str, _user: &User) -> Result<Vec<String>> {
        Ok(vec!["1".into(), "2".into()])
    }

    async fn allowed_methods(&self, _path: &str, _user: &User) -> Result<Vec<String>> {
        Ok([
            "OPTIONS", "GET", "HEAD", "PUT", "DELETE", "MKCOL", "COPY", "MOVE", "LOCK",
            "UNLOCK", "PROPFIND", "PROPPATCH",
        ]
        .iter()
        .map(|m| m.to_string())
        .collect())
    }

    async fn options_cache_control(&self, _path: &str, _user: &User) -> Result<String> {
        Ok("max-age=604800".into())
    }

    async fn is_authorized(&self, path: &str, method: &Method, user: &User) -> Result<bool> {
        let allowed = !(self.deny_anonymous_writes && user.is_anonymous() && is_write(method));
        tracing::trace!(path, method=%method, user=%user.username, allowed, "memory authorization");
        Ok(allowed)
    }

    async fn get_resource(&self, path: &str, base: &str) -> Result<Box<dyn Resource>> {
        let key = key_of(path, base);
        let collection = match self.db.entries()?.get(&key) {
            Some(e) => e.collection,
            None => return Err(DavError::ResourceNotFound(path.to_string())),
        };
        Ok(Box::new(self.handle(path, base, collection)))
    }

    async fn new_resource(&self, path: &str, base: &str) -> Result<Box<dyn Resource>> {
        Ok(Box::new(self.handle(path, base, false)))
    }

    async fn new_collection(&self, path: &str, base: &str) -> Result<Box<dyn Resource>> {
        Ok(Box::new(self.handle(path, base, true)))
    }
}

// ---- RESOURCE ----

pub struct MemoryResource {
    db: Arc<MemDb>,
    base: String,
    key: String,
    collection_hint: bool,
}

impl MemoryResource {
    fn path_of(&self, key: &str, collection: bool) -> String {
        let base = self.base.trim_end_matches('/');
        match (key, collection) {
            ("/", _) => format!("{}/", base),
            (k, true) => format!("{}{}/", base, k),
            (k, false) => format!("{}{}", base, k),
        }
    }

    fn is_collection_now(&self) -> bool {
        self.db
            .entries()
            .ok()
            .and_then(|e| e.get(&self.key).map(|e| e.collection))
            .unwrap_or(self.collection_hint)
    }

    fn target_key(&self, destination: &str, base: &str) -> Result<String> {
        let key = key_of(destination, base);
        if key == "/" {
            return Err(DavError::Forbidden("the mount root can not be replaced".into()));
        }
        Ok(key)
    }
}

#[async_trait]
impl Resource for MemoryResource {
    async fn stream(&self, range: Option<(u64, u64)>, _user: &User) -> Result<ByteStream> {
        let entry = self.db.entry(&self.key)?;
        let content = match range {
            None => entry.content.clone(),
            Some((start, end)) => {
                let len = entry.content.len() as u64;
                if start >= len || start > end {
                    Bytes::new()
                } else {
                    let end = end.min(len - 1);
                    entry.content.slice(start as usize..=end as usize)
                }
            }
        };
        let chunks: Vec<std::io::Result<Bytes>> = content
            .chunks(CHUNK_SIZE)
            .map(|c| Ok(content.slice_ref(c)))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }

    async fn set_stream(&self, mut input: ByteStream, media_type: Option<String>, user: &User) -> Result<()> {
        let previous = self.db.entry(&self.key)?;
        if previous.collection {
            return Err(DavError::MethodNotSupported);
        }

        let mut buffer = BytesMut::new();
        while let Some(chunk) = input.next().await {
            buffer.extend_from_slice(&chunk?);
            let entries = self.db.entries()?;
            self.db
                .check_quota(&entries, previous.content.len() as u64, buffer.len() as u64)?;
        }

        let mut entries = self.db.entries_mut()?;
        let entry = entries
            .get_mut(&self.key)
            .ok_or_else(|| DavError::ResourceNotFound(self.key.clone()))?;
        entry.content = buffer.freeze();
        entry.media_type = media_type.or(entry.media_type.take());
        entry.revision = self.db.next_revision();
        entry.modified = Utc::now();
        tracing::debug!(key=%self.key, user=%user.username, size=entry.content.len(), "memory content written");
        Ok(())
    }

    async fn create(&self, user: &User) -> Result<()> {
        let mut entries = self.db.entries_mut()?;
        if entries.contains_key(&self.key) {
            return Err(DavError::ResourceExists);
        }
        MemDb::check_parent(&entries, &self.key)?;
        entries.insert(self.key.clone(), self.db.new_entry(self.collection_hint));
        tracing::debug!(key=%self.key, user=%user.username, collection=self.collection_hint, "memory entry created");
        Ok(())
    }

    async fn delete(&self, user: &User) -> Result<()> {
        {
            let mut entries = self.db.entries_mut()?;
            if self.key == "/" {
                return Err(DavError::Forbidden("the mount root can not be deleted".into()));
            }
            if !entries.contains_key(&self.key) {
                return Err(DavError::ResourceNotFound(self.key.clone()));
            }
            let has_members = entries
                .keys()
                .any(|k| k != &self.key && is_within(k, &self.key));
            if has_members {
                return Err(DavError::Forbidden("collection is not empty".into()));
            }
            entries.remove(&self.key);
        }
        self.db.locks_mut()?.remove(&self.key);
        tracing::debug!(key=%self.key, user=%user.username, "memory entry deleted");
        Ok(())
    }

    async fn copy(&self, destination: &str, base: &str, user: &User) -> Result<()> {
        let target = self.target_key(destination, base)?;
        let mut entries = self.db.entries_mut()?;
        let source = entries
            .get(&self.key)
            .cloned()
            .ok_or_else(|| DavError::ResourceNotFound(self.key.clone()))?;
        MemDb::check_parent(&entries, &target)?;

        let released = match entries.get(&target) {
            Some(existing) => {
                let has_members = entries.keys().any(|k| k != &target && is_within(k, &target));
                if has_members && !source.collection {
                    return Err(DavError::Forbidden("destination collection is not empty".into()));
                }
                existing.content.len() as u64
            }
            None => 0,
        };
        self.db
            .check_quota(&entries, released, source.content.len() as u64)?;

        let now = Utc::now();
        let copied = Entry {
            revision: self.db.next_revision(),
            created: now,
            modified: now,
            ..source
        };
        entries.insert(target.clone(), copied);
        tracing::debug!(from=%self.key, to=%target, user=%user.username, "memory entry copied");
        Ok(())
    }

    async fn move_to(&self, destination: &str, base: &str, user: &User) -> Result<()> {
        let target = self.target_key(destination, base)?;
        if self.key == "/" {
            return Err(DavError::Forbidden("the mount root can not be moved".into()));
        }
        if is_within(&target, &self.key) {
            return Err(DavError::Forbidden("can not move a resource inside itself".into()));
        }

        let moved: Vec<String> = {
            let mut entries = self.db.entries_mut()?;
            if !entries.contains_key(&self.key) {
                return Err(DavError::ResourceNotFound(self.key.clone()));
            }
            MemDb::check_parent(&entries, &target)?;
            if let Some(existing) = entries.get(&target) {
                let has_members = entries.keys().any(|k| k != &target && is_within(k, &target));
                if existing.collection && has_members {
                    return Err(DavError::Forbidden("destination collection is not empty".into()));
                }
            }

            let keys: Vec<String> = entries
                .keys()
                .filter(|k| is_within(k, &self.key))
                .cloned()
                .collect();
            for k in keys.iter() {
                if let Some(mut entry) = entries.remove(k) {
                    entry.revision = self.db.next_revision();
                    let suffix = &k[self.key.len()..];
                    entries.insert(format!("{}{}", target, suffix), entry);
                }
            }
            keys
        };

        let mut locks = self.db.locks_mut()?;
        for k in moved.iter() {
            locks.remove(k);
        }
        tracing::debug!(from=%self.key, to=%target, user=%user.username, "memory entry moved");
        Ok(())
    }

    async fn length(&self) -> Result<u64> {
        Ok(self.db.entry(&self.key)?.content.len() as u64)
    }

    async fn etag(&self) -> Result<String> {
        Ok(format!("{:016x}", self.db.entry(&self.key)?.revision))
    }

    async fn media_type(&self) -> Result<Option<String>> {
        let entry = self.db.entry(&self.key)?;
        Ok(match entry.collection {
            true => None,
            false => Some(
                entry
                    .media_type
                    .unwrap_or_else(|| guess_media_type(&self.canonical_name()).to_string()),
            ),
        })
    }

    async fn last_modified(&self) -> Result<DateTime<Utc>> {
        Ok(self.db.entry(&self.key)?.modified)
    }

    async fn creation_date(&self) -> Result<DateTime<Utc>> {
        Ok(self.db.entry(&self.key)?.created)
    }

    async fn is_collection(&self) -> Result<bool> {
        Ok(self.db.entry(&self.key)?.collection)
    }

    async fn internal_members(&self, _user: &User) -> Result<Vec<Box<dyn Resource>>> {
        let entries = self.db.entries()?;
        match entries.get(&self.key) {
            None => return Err(DavError::ResourceNotFound(self.key.clone())),
            Some(e) if !e.collection => return Ok(vec![]),
            Some(_) => (),
        }

        let mut members: Vec<(&String, bool)> = entries
            .iter()
            .filter(|(k, _)| parent_key(k) == Some(self.key.as_str()))
            .map(|(k, e)| (k, e.collection))
            .collect();
        members.sort();

        Ok(members
            .into_iter()
            .map(|(k, collection)| {
                Box::new(MemoryResource {
                    db: self.db.clone(),
                    base: self.base.clone(),
                    key: k.clone(),
                    collection_hint: collection,
                }) as Box<dyn Resource>
            })
            .collect())
    }

    fn canonical_name(&self) -> String {
        match self.key.rsplit_once('/') {
            Some((_, name)) => name.to_string(),
            None => String::new(),
        }
    }

    fn canonical_path(&self) -> String {
        self.path_of(&self.key, self.is_collection_now())
    }

    async fn locks(&self) -> Result<Vec<Lock>> {
        Ok(self
            .db
            .locks()?
            .get(&self.key)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_lock_for_user(&self, user: &User) -> Result<Lock> {
        let token = format!("urn:uuid:{}", uuid::Uuid::new_v4());
        Ok(Lock::new(token, user.username.clone(), self.canonical_path()))
    }

    async fn save_lock(&self, lock: &Lock) -> Result<()> {
        let mut locks = self.db.locks_mut()?;
        let list = locks.entry(self.key.clone()).or_default();
        match list.iter_mut().find(|l| l.token == lock.token) {
            Some(existing) => *existing = lock.clone(),
            None => list.push(lock.clone()),
        }
        Ok(())
    }

    async fn delete_lock(&self, token: &str) -> Result<()> {
        let mut locks = self.db.locks_mut()?;
        if let Some(list) = locks.get_mut(&self.key) {
            list.retain(|l| l.token != token);
            if list.is_empty() {
                locks.remove(&self.key);
            }
        }
        Ok(())
    }

    async fn properties(&self) -> Result<Box<dyn Properties>> {
        Ok(Box::new(MemoryProperties {
            db: self.db.clone(),
            key: self.key.clone(),
            name: self.canonical_name(),
        }))
    }
}

// ---- PROPERTIES ----

pub struct MemoryProperties {
    db: Arc<MemDb>,
    key: String,
    name: String,
}

impl MemoryProperties {
    fn live_names(&self, entry: &Entry) -> Vec<&'static str> {
        let mut names = match entry.collection {
            true => LIVE_COLLECTION.to_vec(),
            false => LIVE_FILE.to_vec(),
        };
        if self.db.quota.is_some() {
            names.extend_from_slice(&LIVE_QUOTA);
        }
        names
    }

    fn is_protected(name: &str) -> bool {
        LIVE_FILE.contains(&name) || LIVE_QUOTA.contains(&name) || name == "lockdiscovery"
    }

    fn live(&self, name: &str, entry: &Entry) -> Result<PropValue> {
        let value = match name {
            "creationdate" => PropValue::text(entry.created.to_rfc3339_opts(SecondsFormat::Secs, true)),
            "displayname" => PropValue::text(self.name.as_str()),
            "getcontentlength" if !entry.collection => PropValue::text(entry.content.len().to_string()),
            "getcontenttype" if !entry.collection => PropValue::text(
                entry
                    .media_type
                    .clone()
                    .unwrap_or_else(|| guess_media_type(&self.name).to_string()),
            ),
            "getetag" => PropValue::text(format!("\"{:016x}\"", entry.revision)),
            "getlastmodified" => {
                PropValue::text(entry.modified.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
            }
            "resourcetype" if entry.collection => {
                PropValue::Xml(vec![Node::Element(Element::dav("collection"))])
            }
            "resourcetype" => PropValue::text(""),
            "supportedlock" => PropValue::Xml(supportedlock().children),
            "quota-used-bytes" if self.db.quota.is_some() => {
                let entries = self.db.entries()?;
                PropValue::text(MemDb::used_bytes(&entries, &self.key).to_string())
            }
            "quota-available-bytes" => match self.db.quota {
                Some(quota) => {
                    let entries = self.db.entries()?;
                    let used = MemDb::used_bytes(&entries, "/");
                    PropValue::text(quota.saturating_sub(used).to_string())
                }
                None => return Err(DavError::PropertyNotFound),
            },
            _ => return Err(DavError::PropertyNotFound),
        };
        Ok(value)
    }
}

#[async_trait]
impl Properties for MemoryProperties {
    async fn get(&self, name: &str) -> Result<PropValue> {
        let entry = self.db.entry(&self.key)?;
        match entry.props.get(name) {
            Some(v) => Ok(v.clone()),
            None => self.live(name, &entry),
        }
    }

    async fn set(&self, name: &str, value: PropValue) -> Result<()> {
        self.run_instructions(&[Instruction::Set(name.to_string(), value)])
            .await?
            .map_or(Ok(()), |mut errs| Err(errs.remove(0).1))
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.run_instructions(&[Instruction::Remove(name.to_string())])
            .await?
            .map_or(Ok(()), |mut errs| Err(errs.remove(0).1))
    }

    async fn run_instructions(&self, instructions: &[Instruction]) -> Result<Option<BatchErrors>> {
        let mut entries = self.db.entries_mut()?;
        let entry = entries
            .get_mut(&self.key)
            .ok_or_else(|| DavError::ResourceNotFound(self.key.clone()))?;

        if instructions.iter().any(|i| Self::is_protected(i.name())) {
            let errors = instructions
                .iter()
                .map(|i| match Self::is_protected(i.name()) {
                    true => (i.name().to_string(), DavError::PropertyIsProtected),
                    false => (i.name().to_string(), DavError::FailedDependency),
                })
                .collect();
            return Ok(Some(errors));
        }

        let mut props = entry.props.clone();
        for instruction in instructions {
            match instruction {
                Instruction::Set(name, value) => {
                    props.insert(name.clone(), value.clone());
                }
                Instruction::Remove(name) => {
                    props.remove(name);
                }
            }
        }
        entry.props = props;
        Ok(None)
    }

    async fn get_all(&self) -> Result<Vec<(String, PropValue)>> {
        let entry = self.db.entry(&self.key)?;
        let mut all = vec![];
        for name in self.live_names(&entry) {
            if LIVE_QUOTA.contains(&name) {
                continue;
            }
            all.push((name.to_string(), self.live(name, &entry)?));
        }
        all.extend(entry.props.into_iter());
        Ok(all)
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut names = self.list_live().await?;
        names.extend(self.list_dead().await?);
        Ok(names)
    }

    async fn list_live(&self) -> Result<Vec<String>> {
        let entry = self.db.entry(&self.key)?;
        Ok(self
            .live_names(&entry)
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    async fn list_dead(&self) -> Result<Vec<String>> {
        Ok(self.db.entry(&self.key)?.props.into_keys().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> User {
        User::new("alice")
    }

    async fn put(adapter: &MemoryAdapter, path: &str, content: &'static [u8]) {
        let res = adapter.new_resource(path, "/").await.unwrap();
        res.create(&alice()).await.unwrap();
        let input = stream::iter(vec![Ok(Bytes::from_static(content))]).boxed();
        res.set_stream(input, None, &alice()).await.unwrap();
    }

    async fn read(res: &dyn Resource, range: Option<(u64, u64)>) -> Vec<u8> {
        let mut out = vec![];
        let mut s = res.stream(range, &alice()).await.unwrap();
        while let Some(chunk) = s.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[test]
    fn keys() {
        assert_eq!(key_of("/", "/"), "/");
        assert_eq!(key_of("/a/b/", "/"), "/a/b");
        assert_eq!(key_of("/dav/a", "/dav/"), "/a");
        assert_eq!(key_of("/dav/", "/dav/"), "/");
        assert_eq!(parent_key("/a/b"), Some("/a"));
        assert_eq!(parent_key("/a"), Some("/"));
        assert_eq!(parent_key("/"), None);
        assert!(is_within("/a/b", "/a"));
        assert!(!is_within("/ab", "/a"));
    }

    #[tokio::test]
    async fn tree_must_be_complete() {
        let adapter = MemoryAdapter::new();
        let res = adapter.new_resource("/a/b/c", "/").await.unwrap();
        assert!(matches!(
            res.create(&alice()).await,
            Err(DavError::ResourceTreeNotComplete)
        ));

        let col = adapter.new_collection("/a/", "/").await.unwrap();
        col.create(&alice()).await.unwrap();
        assert_eq!(col.canonical_path(), "/a/");
        assert!(matches!(col.create(&alice()).await, Err(DavError::ResourceExists)));
    }

    #[tokio::test]
    async fn content_and_ranges() {
        let adapter = MemoryAdapter::new();
        put(&adapter, "/hello.txt", b"hello world").await;
        let res = adapter.get_resource("/hello.txt", "/").await.unwrap();
        assert_eq!(read(res.as_ref(), None).await, b"hello world");
        assert_eq!(read(res.as_ref(), Some((6, 100))).await, b"world");
        assert_eq!(res.length().await.unwrap(), 11);
        assert_eq!(res.media_type().await.unwrap().as_deref(), Some("text/plain"));

        let etag = res.etag().await.unwrap();
        put_again(&adapter, "/hello.txt").await;
        assert_ne!(res.etag().await.unwrap(), etag);
    }

    async fn put_again(adapter: &MemoryAdapter, path: &str) {
        let res = adapter.get_resource(path, "/").await.unwrap();
        let input = stream::iter(vec![Ok(Bytes::from_static(b"bye"))]).boxed();
        res.set_stream(input, None, &alice()).await.unwrap();
    }

    #[tokio::test]
    async fn quota_is_enforced() {
        let adapter = MemoryAdapter::with_quota(8);
        let res = adapter.new_resource("/big", "/").await.unwrap();
        res.create(&alice()).await.unwrap();
        let input = stream::iter(vec![Ok(Bytes::from_static(b"0123456789"))]).boxed();
        assert!(matches!(
            res.set_stream(input, None, &alice()).await,
            Err(DavError::InsufficientStorage)
        ));
        assert_eq!(res.length().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn members_and_delete() {
        let adapter = MemoryAdapter::new();
        adapter
            .new_collection("/dir/", "/")
            .await
            .unwrap()
            .create(&alice())
            .await
            .unwrap();
        put(&adapter, "/dir/b", b"b").await;
        put(&adapter, "/dir/a", b"a").await;

        let dir = adapter.get_resource("/dir", "/").await.unwrap();
        assert_eq!(dir.canonical_path(), "/dir/");
        let names: Vec<String> = dir
            .internal_members(&alice())
            .await
            .unwrap()
            .iter()
            .map(|m| m.canonical_path())
            .collect();
        assert_eq!(names, vec!["/dir/a", "/dir/b"]);

        assert!(matches!(dir.delete(&alice()).await, Err(DavError::Forbidden(_))));
        for m in dir.internal_members(&alice()).await.unwrap() {
            m.delete(&alice()).await.unwrap();
        }
        dir.delete(&alice()).await.unwrap();
        assert!(matches!(
            adapter.get_resource("/dir/", "/").await,
            Err(DavError::ResourceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn move_rekeys_subtree() {
        let adapter = MemoryAdapter::new();
        adapter
            .new_collection("/src/", "/")
            .await
            .unwrap()
            .create(&alice())
            .await
            .unwrap();
        put(&adapter, "/src/file", b"data").await;
        let src = adapter.get_resource("/src/", "/").await.unwrap();
        src.move_to("/dst/", "/", &alice()).await.unwrap();
        let moved = adapter.get_resource("/dst/file", "/").await.unwrap();
        assert_eq!(read(moved.as_ref(), None).await, b"data");
        assert!(adapter.get_resource("/src/", "/").await.is_err());
    }

    #[tokio::test]
    async fn protected_properties_refuse_the_whole_batch() {
        let adapter = MemoryAdapter::new();
        put(&adapter, "/f", b"x").await;
        let props = adapter
            .get_resource("/f", "/")
            .await
            .unwrap()
            .properties()
            .await
            .unwrap();
        let batch = vec![
            Instruction::Set("urn:x%%color".into(), PropValue::text("blue")),
            Instruction::Set("getetag".into(), PropValue::text("nope")),
        ];
        let errors = props.run_instructions(&batch).await.unwrap().unwrap();
        assert!(matches!(errors[0].1, DavError::FailedDependency));
        assert!(matches!(errors[1].1, DavError::PropertyIsProtected));
        assert!(matches!(props.get("urn:x%%color").await, Err(DavError::PropertyNotFound)));

        let batch = vec![
            Instruction::Set("urn:x%%color".into(), PropValue::text("blue")),
            Instruction::Remove("urn:x%%color".into()),
            Instruction::Set("urn:x%%size".into(), PropValue::text("XL")),
        ];
        assert!(props.run_instructions(&batch).await.unwrap().is_none());
        assert_eq!(props.list_dead().await.unwrap(), vec!["urn:x%%size".to_string()]);
        assert_eq!(props.get("getcontentlength").await.unwrap(), PropValue::text("1"));
    }

    #[tokio::test]
    async fn single_property_updates() {
        let adapter = MemoryAdapter::new();
        put(&adapter, "/f", b"abc").await;
        let res = adapter.get_resource("/f", "/").await.unwrap();
        assert!(res.creation_date().await.unwrap() <= res.last_modified().await.unwrap());

        let props = res.properties().await.unwrap();
        props
            .set_by_user("urn:x%%color", PropValue::text("red"), &alice())
            .await
            .unwrap();
        assert_eq!(
            props.get_by_user("urn:x%%color", &alice()).await.unwrap(),
            PropValue::text("red")
        );
        assert!(matches!(
            props.set("getetag", PropValue::text("x")).await,
            Err(DavError::PropertyIsProtected)
        ));
        props.remove_by_user("urn:x%%color", &alice()).await.unwrap();
        assert!(props.list_dead().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn locks_survive_until_deleted() {
        let adapter = MemoryAdapter::new();
        let res = adapter.new_resource("/unmapped", "/").await.unwrap();
        let mut lock = res.create_lock_for_user(&alice()).await.unwrap();
        assert!(lock.token.starts_with("urn:uuid:"));
        res.save_lock(&lock).await.unwrap();
        lock.provisional = false;
        res.save_lock(&lock).await.unwrap();
        let locks = res.locks().await.unwrap();
        assert_eq!(locks.len(), 1);
        assert!(!locks[0].provisional);
        assert_eq!(res.locks_by_user(&User::new("bob")).await.unwrap().len(), 0);
        res.delete_lock(&lock.token).await.unwrap();
        assert!(res.locks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn anonymous_writes_can_be_denied() {
        let adapter = MemoryAdapter::new().deny_anonymous_writes(true);
        let anon = User::anonymous();
        assert!(adapter.is_authorized("/", &Method::GET, &anon).await.unwrap());
        assert!(!adapter.is_authorized("/", &Method::PUT, &anon).await.unwrap());
        assert!(adapter.is_authorized("/", &Method::PUT, &alice()).await.unwrap());
    }
}
