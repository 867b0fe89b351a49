use std::fs;
use std::path::PathBuf;

use proxy_cache::cache::Cache;
use proxy_cache::context::RequestContext;

fn temp_root(name: &str) -> PathBuf {
    let root = std::env::temp_dir().join(format!("proxy_cache_{}_{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&root);
    root
}

fn request(uri: &str) -> RequestContext {
    let mut request = RequestContext::new();
    request.uri = uri.to_string();
    request
}

const RESPONSE: &[u8] =
    b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nCache-Control: max-age=60\r\n\r\nHELLO";

#[test]
fn writer_stores_exact_bytes_and_reader_replays_them() {
    let root = temp_root("round_trip");
    let mut cache = Cache::new(root.clone()).unwrap();
    let req = request("http://origin/data");

    assert!(cache.open_writer(&req, 60));
    cache.append(&req, &RESPONSE[..20]);
    cache.append(&req, &RESPONSE[20..]);
    cache.finish_writer(&req);

    let body_file = root.join(Cache::fingerprint(&req.uri));
    assert_eq!(fs::read(&body_file).unwrap(), RESPONSE);
    let metadata_file = root.join("metadata").join(Cache::fingerprint(&req.uri));
    let metadata = fs::read_to_string(&metadata_file).unwrap();
    assert!(metadata.contains("hits:0\r\n"));
    assert!(metadata.contains(&format!("url:{}\r\n", req.uri)));

    assert!(cache.lookup(&req));
    assert!(cache.open_reader(&req));
    let mut replayed = Vec::new();
    loop {
        let chunk = cache.load_chunk(&req, 0);
        if chunk.is_empty() {
            break;
        }
        replayed.extend_from_slice(&chunk);
    }
    assert_eq!(replayed, RESPONSE);

    // the hit bumped the counter
    let metadata = fs::read_to_string(&metadata_file).unwrap();
    assert!(metadata.contains("hits:1\r\n"));
}

#[test]
fn open_uri_is_excluded_from_second_use() {
    let root = temp_root("exclusion");
    let mut cache = Cache::new(root).unwrap();
    let req = request("http://origin/busy");

    assert!(cache.open_writer(&req, 60));
    // while the writer is open the entry is neither hittable nor re-openable
    assert!(!cache.lookup(&req));
    assert!(!cache.open_writer(&req, 60));

    cache.append(&req, RESPONSE);
    cache.finish_writer(&req);
    assert!(cache.lookup(&req));
    assert!(cache.open_reader(&req));
    // reader still open: next request bypasses the cache
    assert!(!cache.lookup(&req));
}

#[test]
fn body_and_metadata_exist_together_or_not_at_all() {
    let root = temp_root("pairing");
    let mut cache = Cache::new(root.clone()).unwrap();
    let req = request("http://origin/pair");

    assert!(cache.open_writer(&req, 60));
    cache.append(&req, RESPONSE);
    cache.finish_writer(&req);

    let body_file = root.join(Cache::fingerprint(&req.uri));
    let metadata_file = root.join("metadata").join(Cache::fingerprint(&req.uri));
    assert!(body_file.is_file() && metadata_file.is_file());

    cache.delete(&req.uri).unwrap();
    assert!(!body_file.exists() && !metadata_file.exists());
}

#[test]
fn expired_entries_are_deleted_on_lookup() {
    let root = temp_root("expiry");
    let mut cache = Cache::new(root.clone()).unwrap();
    let req = request("http://origin/stale");

    assert!(cache.open_writer(&req, 60));
    cache.append(&req, RESPONSE);
    cache.finish_writer(&req);

    // force the entry into the past
    let metadata_file = root.join("metadata").join(Cache::fingerprint(&req.uri));
    fs::write(
        &metadata_file,
        format!("expiration_date:1\r\nurl:{}\r\nhits:0\r\n", req.uri),
    )
    .unwrap();

    assert!(!cache.lookup(&req));
    assert!(!root.join(Cache::fingerprint(&req.uri)).exists());
    assert!(!metadata_file.exists());
}

#[test]
fn repeated_hits_keep_counting() {
    let root = temp_root("hits");
    let mut cache = Cache::new(root.clone()).unwrap();
    let req = request("http://origin/popular");

    assert!(cache.open_writer(&req, 600));
    cache.append(&req, RESPONSE);
    cache.finish_writer(&req);

    assert!(cache.lookup(&req));
    assert!(cache.lookup(&req));
    assert!(cache.lookup(&req));
    let metadata_file = root.join("metadata").join(Cache::fingerprint(&req.uri));
    assert!(fs::read_to_string(&metadata_file).unwrap().contains("hits:3\r\n"));
}

#[test]
fn list_and_delete_all() {
    let root = temp_root("listing");
    let mut cache = Cache::new(root.clone()).unwrap();
    for uri in ["http://origin/a", "http://origin/b"] {
        let req = request(uri);
        assert!(cache.open_writer(&req, 60));
        cache.append(&req, RESPONSE);
        cache.finish_writer(&req);
    }

    let listed = cache.list_cached();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].0, "http://origin/a");
    assert_eq!(listed[1].0, "http://origin/b");
    assert_eq!(listed[0].2, "0");

    cache.delete_all();
    assert!(cache.list_cached().is_empty());
    assert!(!root.join(Cache::fingerprint("http://origin/a")).exists());
    assert!(!root.join("metadata").join(Cache::fingerprint("http://origin/b")).exists());
}

#[test]
fn load_chunk_respects_the_send_buffer_cap() {
    let root = temp_root("chunking");
    let mut cache = Cache::new(root).unwrap();
    let req = request("http://origin/large");

    let body = vec![0x42u8; 10_000];
    assert!(cache.open_writer(&req, 60));
    cache.append(&req, &body);
    cache.finish_writer(&req);

    assert!(cache.lookup(&req));
    assert!(cache.open_reader(&req));
    let chunk = cache.load_chunk(&req, 1000);
    assert_eq!(chunk.len(), 4096 - 1000);
    let chunk = cache.load_chunk(&req, 0);
    assert_eq!(chunk.len(), 4096);
}
