//! Management page body: cache table plus throughput block.

use crate::prelude::*;

pub fn render(ctx: &AppCtx) -> Vec<u8> {
    let mut body = wire::html::page_header();
    body.push_str("<h3>Cache Stored</h3>");
    body.push_str(&wire::html::cache_table(&ctx.cache.borrow().list_cached()));
    body.push_str("<h3>Throughput Statistics</h3>");
    let (seconds, rate) = ctx.stats.borrow_mut().throughput();
    body.push_str(&format!(
        "<td> throughput rate for the last {} seconds:\r\n",
        seconds
    ));
    body.push_str(&format!("<td> {} bytes/second </td>", rate));
    body.push_str("</html>");
    body.into_bytes()
}
