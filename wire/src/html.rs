//! HTML fragments for the management page.

const START_TABLE: &str = concat!(
    "<style>",
    "table, th, td {",
    "border: 1px solid black;",
    "}",
    "</style>",
    "<body>",
    "<table style=\"width:500px\">",
    "<tr>",
    "<th>Num</th>",
    "<th>Url Cached</th>",
    "<th>Expiration Date</th>",
    "<th>Cache Hits</th>",
    "<th>Delete</th>",
    "</tr>",
);

const END_TABLE: &str = "</table></body>";

pub fn page_header() -> String {
    format!(
        "<html>\
         <head>\
         <title>Management</title>\
         <link rel=\"stylesheet\" type=\"text/css\" href=\"style.css\">\
         </head>\
         <meta http-equiv=\"refresh\" content=\"1;URL=/manage\" >\
         <h1>HTTP Proxy</h1>\
         <h2>Management Interface</h2>\
         {}\t\t{}",
        refresh_form(),
        delete_all_form(),
    )
}

pub fn refresh_form() -> String {
    "<form action=\"/manage\">\
     <input type=\"submit\" value=\"refresh\">\
     </form>"
        .to_string()
}

pub fn delete_form(url: &str) -> String {
    format!(
        "<form action=\"/manage\" enctype=\"multipart/form-data\" method=\"GET\">\
         <input type=\"hidden\" name=\"url\" value=\"{}\">\
         <input type=\"submit\" value=\"delete\">\
         </form>",
        url,
    )
}

pub fn delete_all_form() -> String {
    "<form action=\"/manage\" enctype=\"multipart/form-data\" method=\"GET\">\
     <input type=\"hidden\" name=\"url\" value=\"all\">\
     <input type=\"submit\" value=\"delete all\">\
     </form>"
        .to_string()
}

/// Renders the cached-entries table. Each entry is (uri, expiration, hits).
pub fn cache_table(entries: &[(String, String, String)]) -> String {
    let mut body = String::from(START_TABLE);
    for (counter, (uri, expiration, hits)) in entries.iter().enumerate() {
        body.push_str(&format!(
            "<tr align=\"center\">\
             <td> {} </td>\
             <td> {} </td>\
             <td> {} </td>\
             <td> {} </td>\
             <td> {} </td>\
             </tr>",
            counter + 1,
            uri,
            expiration,
            hits,
            delete_form(uri),
        ));
    }
    body.push_str(END_TABLE);
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_table_has_only_headers() {
        let table = cache_table(&[]);
        assert!(table.contains("<th>Url Cached</th>"));
        assert!(!table.contains("<tr align=\"center\">"));
    }

    #[test]
    fn rows_are_numbered_and_carry_delete_forms() {
        let entries = vec![
            (
                "http://a/".to_string(),
                "Mon Jan  1 00:00:00 2026".to_string(),
                "3".to_string(),
            ),
            ("http://b/".to_string(), "exp".to_string(), "0".to_string()),
        ];
        let table = cache_table(&entries);
        assert!(table.contains("<td> 1 </td>"));
        assert!(table.contains("<td> 2 </td>"));
        assert!(table.contains("value=\"http://a/\""));
        assert!(table.contains("<td> 3 </td>"));
    }

    #[test]
    fn page_header_links_manage() {
        let header = page_header();
        assert!(header.contains("Management Interface"));
        assert!(header.contains("URL=/manage"));
        assert!(header.contains("value=\"all\""));
    }
}
