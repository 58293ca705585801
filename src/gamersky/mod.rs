mod catalog;

use crate::{extract, Article, ContentItem, ExtractError, Source};
use lazy_regex::regex;
use regex::Regex;

pub const SOURCE_TAG: &str = "GamerSky-趣闻";
pub const CATALOG_ADDRESS: &str = "https://www.gamersky.com/ent/qw/";

const BODY_CLASS: &str = "Mid2L_con";
const PAGINATION_MARKER: &str = "<!--{pe.begin.pagination}-->";
const FRAGMENT_DELIMITER: &str = "</p>";

/// Picture galleries of the GamerSky entertainment channel.
#[derive(Debug, Default)]
pub struct GamerSky;

impl Source for GamerSky {
    fn tag(&self) -> &str {
        SOURCE_TAG
    }

    fn catalog_address(&self) -> &str {
        CATALOG_ADDRESS
    }

    fn isolate_body<'a>(&self, page: &'a str) -> Option<&'a str> {
        extract::isolate_block(page, BODY_CLASS)
    }

    fn split_pagination<'a>(&self, body: &'a str) -> Result<(&'a str, &'a str), ExtractError> {
        extract::split_at_marker(body, PAGINATION_MARKER)
    }

    fn split_fragments<'a>(&self, content: &'a str) -> Vec<&'a str> {
        extract::split_fragments(content, FRAGMENT_DELIMITER)
    }

    fn extract_item(&self, fragment: &str) -> Result<ContentItem, ExtractError> {
        // Full size images sit behind the image viewer: showimage/id_gamersky.shtml?<image>
        let viewer: &Regex = regex!(r#"(?i)<a\s[^>]*?\.shtml\?(?P<link>[^"'>]+)["']"#);
        let inline: &Regex = regex!(r#"(?i)<img\s[^>]*?src\s*=\s*["'](?P<link>[^"']+)["']"#);
        extract::extract_item(fragment, &[viewer, inline])
    }

    fn next_link(&self, pagination: &str, current_page: &str) -> Option<String> {
        let anchor: &Regex = regex!(r#"(?i)<a\s[^>]*?href="(?P<link>[^"]+)"[^>]*>\s*下一页\s*</a>"#);
        extract::next_link(pagination, anchor, current_page)
    }

    fn catalog_entries(&self, page: &str, address: &str) -> Vec<Result<Article, ExtractError>> {
        catalog::entries(page, address, SOURCE_TAG)
    }
}
