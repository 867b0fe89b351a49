use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use proxy_cache::cache::Cache;
use proxy_cache::context::{AppCtx, RequestContext};
use proxy_cache::manage;
use proxy_cache::stats::Stats;

fn temp_root(name: &str) -> PathBuf {
    let root = std::env::temp_dir().join(format!("proxy_manage_{}_{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&root);
    root
}

fn ctx(root: PathBuf) -> AppCtx {
    AppCtx {
        cache: Rc::new(RefCell::new(Cache::new(root).unwrap())),
        stats: Rc::new(RefCell::new(Stats::new())),
        base: PathBuf::from("."),
    }
}

#[test]
fn page_lists_cached_entries() {
    let ctx = ctx(temp_root("list"));
    {
        let mut cache = ctx.cache.borrow_mut();
        let mut request = RequestContext::new();
        request.uri = "http://origin/page".to_string();
        assert!(cache.open_writer(&request, 60));
        cache.append(&request, b"HTTP/1.1 200 OK\r\n\r\nbody");
        cache.finish_writer(&request);
    }

    let body = String::from_utf8(manage::render(&ctx)).unwrap();
    assert!(body.contains("Management Interface"));
    assert!(body.contains("<h3>Cache Stored</h3>"));
    assert!(body.contains("http://origin/page"));
    assert!(body.contains("<h3>Throughput Statistics</h3>"));
    assert!(body.contains("bytes/second"));
}

#[test]
fn empty_cache_renders_an_empty_table() {
    let ctx = ctx(temp_root("empty"));
    let body = String::from_utf8(manage::render(&ctx)).unwrap();
    assert!(body.contains("<h3>Cache Stored</h3>"));
    assert!(!body.contains("<tr align=\"center\">"));
}

#[test]
fn throughput_reflects_recorded_bytes() {
    let ctx = ctx(temp_root("throughput"));
    ctx.stats.borrow_mut().add(8192);
    std::thread::sleep(std::time::Duration::from_millis(20));
    let body = String::from_utf8(manage::render(&ctx)).unwrap();
    assert!(body.contains("throughput rate for the last"));
}
