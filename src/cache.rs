use std::fs::{self, File};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{Local, TimeZone};
use sha1::{Digest, Sha1};

use crate::prelude::*;

/// One URI's open on-disk body handle. Presence in the map is the exclusion
/// token: while a URI is open, no second writer and no second reader exists.
enum OpenFile {
    Reader(File),
    Writer(File),
}

struct Metadata {
    expiration_date: u64,
    url: String,
    hits: u64,
}

/// Disk-backed response cache. Bodies live at `<root>/<fingerprint>`,
/// metadata at `<root>/metadata/<fingerprint>`; the fingerprint is the
/// lowercase-hex SHA-1 of the raw request URI.
pub struct Cache {
    root: PathBuf,
    opened_files: HashMap<String, OpenFile>,
}

impl Cache {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(root.join("metadata"))?;
        Ok(Self {
            root,
            opened_files: HashMap::new(),
        })
    }

    pub fn fingerprint(uri: &str) -> String {
        hex::encode(Sha1::digest(uri.as_bytes()))
    }

    fn body_path(&self, uri: &str) -> PathBuf {
        self.root.join(Self::fingerprint(uri))
    }

    fn metadata_path(&self, uri: &str) -> PathBuf {
        self.root.join("metadata").join(Self::fingerprint(uri))
    }

    /// The response is cacheable when `Cache-Control` carries a positive
    /// `max-age`; returns its value in seconds. All other directives are
    /// ignored.
    pub fn is_cacheable_response(headers: &HashMap<String, String>) -> Option<u64> {
        let cache_header = headers.get("Cache-Control")?;
        for entry in cache_header.split(',') {
            let mut split = entry.splitn(2, '=');
            let key = split.next()?.trim();
            if key == "max-age" {
                let max_age = split.next()?.trim().parse::<u64>().ok()?;
                if max_age > 0 {
                    return Some(max_age);
                }
            }
        }
        None
    }

    /// True when the URI may be served from cache: nobody else holds its
    /// handle, the body exists, and the entry has not expired. A valid hit
    /// bumps the hit counter; an expired one deletes both files.
    pub fn lookup(&mut self, request: &RequestContext) -> bool {
        if self.opened_files.contains_key(&request.uri) {
            return false;
        }
        if !self.body_path(&request.uri).is_file() {
            return false;
        }
        let mut metadata = match self.read_metadata(&request.uri) {
            Ok(metadata) => metadata,
            Err(e) => {
                error!("cache: bad metadata for {}: {}", request.uri, e);
                return false;
            }
        };
        if metadata.expiration_date >= unix_now() {
            metadata.hits += 1;
            if let Err(e) = self.write_metadata(&request.uri, &metadata) {
                error!("cache: updating metadata for {}: {}", request.uri, e);
            }
            true
        } else {
            if let Err(e) = self.delete(&request.uri) {
                error!("cache: deleting expired {}: {}", request.uri, e);
            }
            false
        }
    }

    /// Claims the URI's body for reading. Must follow a successful `lookup`.
    pub fn open_reader(&mut self, request: &RequestContext) -> bool {
        match File::open(self.body_path(&request.uri)) {
            Ok(file) => {
                self.opened_files
                    .insert(request.uri.clone(), OpenFile::Reader(file));
                true
            }
            Err(e) => {
                error!("cache: opening body for {}: {}", request.uri, e);
                false
            }
        }
    }

    /// Creates body and metadata files for the URI and claims the writer
    /// handle. Failures are logged and caching is abandoned for this round.
    pub fn open_writer(&mut self, request: &RequestContext, ttl_seconds: u64) -> bool {
        if self.opened_files.contains_key(&request.uri) {
            // another connection holds this URI; skip caching this round
            return false;
        }
        let metadata = Metadata {
            expiration_date: unix_now() + ttl_seconds,
            url: request.uri.clone(),
            hits: 0,
        };
        let body = match File::create(self.body_path(&request.uri)) {
            Ok(file) => file,
            Err(e) => {
                error!("cache: creating body for {}: {}", request.uri, e);
                return false;
            }
        };
        if let Err(e) = self.write_metadata(&request.uri, &metadata) {
            error!("cache: creating metadata for {}: {}", request.uri, e);
            let _ = fs::remove_file(self.body_path(&request.uri));
            return false;
        }
        self.opened_files
            .insert(request.uri.clone(), OpenFile::Writer(body));
        true
    }

    /// Appends response bytes to the URI's open writer; silent no-op when no
    /// writer is open.
    pub fn append(&mut self, request: &RequestContext, bytes: &[u8]) {
        if let Some(OpenFile::Writer(file)) = self.opened_files.get_mut(&request.uri) {
            if let Err(e) = file.write_all(bytes) {
                error!("cache: writing body for {}: {}", request.uri, e);
            }
        }
    }

    /// Releases the URI's writer handle, making the entry hittable. No-op
    /// when the open handle is a reader (it belongs to another connection).
    pub fn finish_writer(&mut self, request: &RequestContext) {
        if let Some(OpenFile::Writer(_)) = self.opened_files.get(&request.uri) {
            self.opened_files.remove(&request.uri);
        }
    }

    /// Reads the next chunk of a cached body, at most enough to fill the
    /// caller's send buffer to `TO_SEND_MAXSIZE`. An empty return means the
    /// body is exhausted and the reader handle has been released.
    pub fn load_chunk(&mut self, request: &RequestContext, to_send_len: usize) -> Vec<u8> {
        let Some(OpenFile::Reader(file)) = self.opened_files.get_mut(&request.uri) else {
            return Vec::new();
        };
        if to_send_len >= TO_SEND_MAXSIZE {
            return Vec::new();
        }
        let mut buf = vec![0u8; TO_SEND_MAXSIZE - to_send_len];
        match file.read(&mut buf) {
            Ok(0) => {
                self.opened_files.remove(&request.uri);
                Vec::new()
            }
            Ok(n) => {
                buf.truncate(n);
                buf
            }
            Err(e) => {
                error!("cache: reading body for {}: {}", request.uri, e);
                self.opened_files.remove(&request.uri);
                Vec::new()
            }
        }
    }

    /// All stored entries as (uri, formatted expiration date, hits), sorted
    /// by URI for a stable management table.
    pub fn list_cached(&self) -> Vec<(String, String, String)> {
        let mut entries = Vec::new();
        let Ok(dir) = fs::read_dir(&self.root) else {
            return entries;
        };
        for file in dir.flatten() {
            let name = file.file_name();
            let name = name.to_string_lossy();
            if !file.path().is_file() || name.starts_with('.') {
                continue;
            }
            match self.read_metadata_file(&self.root.join("metadata").join(name.as_ref())) {
                Ok(metadata) => {
                    entries.push((
                        metadata.url,
                        format_expiration(metadata.expiration_date),
                        metadata.hits.to_string(),
                    ));
                }
                Err(e) => error!("cache: listing {}: {}", name, e),
            }
        }
        entries.sort();
        entries
    }

    /// Removes one entry's body and metadata.
    pub fn delete(&mut self, uri: &str) -> io::Result<()> {
        fs::remove_file(self.body_path(uri))?;
        fs::remove_file(self.metadata_path(uri))?;
        Ok(())
    }

    /// Removes every stored entry.
    pub fn delete_all(&mut self) {
        let Ok(dir) = fs::read_dir(&self.root) else {
            return;
        };
        for file in dir.flatten() {
            let name = file.file_name();
            if !file.path().is_file() || name.to_string_lossy().starts_with('.') {
                continue;
            }
            let _ = fs::remove_file(file.path());
            let _ = fs::remove_file(self.root.join("metadata").join(&name));
        }
    }

    fn read_metadata(&self, uri: &str) -> io::Result<Metadata> {
        self.read_metadata_file(&self.metadata_path(uri))
    }

    fn read_metadata_file(&self, path: &Path) -> io::Result<Metadata> {
        let mut bytes = fs::read(path)?;
        let mut fields: HashMap<String, String> = HashMap::new();
        while let Some(line) = wire::read_line(&mut bytes) {
            if let Some((key, value)) = line.split_once(':') {
                fields.insert(key.to_string(), value.to_string());
            }
        }
        let metadata = Metadata {
            expiration_date: fields
                .get("expiration_date")
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| bad_metadata("expiration_date"))?,
            url: fields.get("url").cloned().ok_or_else(|| bad_metadata("url"))?,
            hits: fields
                .get("hits")
                .and_then(|v| v.parse().ok())
                .ok_or_else(|| bad_metadata("hits"))?,
        };
        Ok(metadata)
    }

    fn write_metadata(&self, uri: &str, metadata: &Metadata) -> io::Result<()> {
        fs::write(
            self.metadata_path(uri),
            format!(
                "expiration_date:{}\r\nurl:{}\r\nhits:{}\r\n",
                metadata.expiration_date, metadata.url, metadata.hits,
            ),
        )
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn format_expiration(expiration: u64) -> String {
    match Local.timestamp_opt(expiration as i64, 0).single() {
        Some(date) => date.format("%c").to_string(),
        None => expiration.to_string(),
    }
}

fn bad_metadata(field: &str) -> io::Error {
    io::Error::new(
        ErrorKind::InvalidData,
        format!("metadata missing field '{}'", field),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_sha1_hex() {
        // well-known SHA-1 test vector
        assert_eq!(
            Cache::fingerprint("abc"),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert_eq!(Cache::fingerprint("http://a/"), Cache::fingerprint("http://a/"));
        assert_ne!(Cache::fingerprint("http://a/"), Cache::fingerprint("http://A/"));
    }

    #[test]
    fn cacheable_needs_positive_max_age() {
        let headers = |v: &str| {
            HashMap::from([("Cache-Control".to_string(), v.to_string())])
        };
        assert_eq!(
            Cache::is_cacheable_response(&headers("max-age=60")),
            Some(60)
        );
        assert_eq!(
            Cache::is_cacheable_response(&headers("public, max-age=300")),
            Some(300)
        );
        assert_eq!(Cache::is_cacheable_response(&headers("max-age=0")), None);
        assert_eq!(Cache::is_cacheable_response(&headers("no-store")), None);
        assert_eq!(Cache::is_cacheable_response(&HashMap::new()), None);
    }
}
