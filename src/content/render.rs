use std::collections::{HashMap, HashSet};

/// Markup a post body may keep after sanitizing.
pub const POST_TAGS: &[&str] = &[
    "a",
    "abbr",
    "acronym",
    "b",
    "blockquote",
    "code",
    "em",
    "i",
    "li",
    "ol",
    "pre",
    "strong",
    "ul",
    "h1",
    "h2",
    "h3",
    "p",
];

/// Markup a comment body may keep after sanitizing.
pub const COMMENT_TAGS: &[&str] = &["a", "abbr", "acronym", "b", "code", "em", "i", "strong"];

/// Render markdown to HTML, turn bare URLs into links and strip every tag not
/// in `allowed_tags`. Text inside stripped tags is kept.
pub fn render_restricted_markdown(source: &str, allowed_tags: &[&str]) -> String {
    let mut options = comrak::Options::default();
    options.extension.autolink = true;
    // Raw HTML passes through here; ammonia decides what survives.
    options.render.unsafe_ = true;
    let html = comrak::markdown_to_html(source, &options);

    let tags: HashSet<&str> = allowed_tags.iter().copied().collect();
    let mut attributes: HashMap<&str, HashSet<&str>> = HashMap::new();
    attributes.insert("a", ["href", "title"].into_iter().collect());
    attributes.insert("abbr", ["title"].into_iter().collect());
    attributes.insert("acronym", ["title"].into_iter().collect());

    ammonia::Builder::default()
        .tags(tags)
        .tag_attributes(attributes)
        .generic_attributes(HashSet::new())
        .link_rel(Some("nofollow"))
        .clean(&html)
        .to_string()
        .trim()
        .to_string()
}

pub fn render_post(source: &str) -> String {
    render_restricted_markdown(source, POST_TAGS)
}

pub fn render_comment(source: &str) -> String {
    render_restricted_markdown(source, COMMENT_TAGS)
}
