use pretty_assertions::assert_eq;
use voltek_content::ContentFormatter;

fn format(text: &str) -> String {
    ContentFormatter.format(text)
}

// ── Whitespace ───────────────────────────────────────────────────

#[test]
fn escaped_newlines_become_real_newlines() {
    assert_eq!(format("line one\\nline two"), "line one\nline two");
}

#[test]
fn escaped_crlf_becomes_one_newline() {
    assert_eq!(format("line one\\r\\nline two"), "line one\nline two");
}

#[test]
fn escaped_tabs_become_real_tabs() {
    assert_eq!(format("col a\\tcol b"), "col a\tcol b");
}

#[test]
fn crlf_normalizes_to_lf() {
    assert_eq!(format("line one\r\nline two"), "line one\nline two");
}

#[test]
fn blank_line_runs_collapse_to_one() {
    assert_eq!(format("intro\n\n\n\nbody"), "intro\n\nbody");
}

#[test]
fn single_blank_line_is_kept() {
    assert_eq!(format("intro\n\nbody"), "intro\n\nbody");
}

#[test]
fn trailing_whitespace_is_trimmed_per_line() {
    assert_eq!(format("intro   \nbody\t"), "intro\nbody");
}

#[test]
fn outer_whitespace_is_trimmed() {
    assert_eq!(format("  \n  Brake service  \n  "), "Brake service");
}

// ── Markup ───────────────────────────────────────────────────────

#[test]
fn bold_italic_underline_map_to_html() {
    assert_eq!(
        format("[b]ECU[/b] [i]remap[/i] [u]stage 2[/u]"),
        "<strong>ECU</strong> <em>remap</em> <u>stage 2</u>"
    );
}

#[test]
fn br_maps_to_html_break() {
    assert_eq!(format("first[br]second"), "first<br>second");
}

#[test]
fn url_tag_becomes_anchor() {
    assert_eq!(
        format("see [url=https://voltek.example/pricing]our pricing[/url] page"),
        "see <a href=\"https://voltek.example/pricing\">our pricing</a> page"
    );
}

#[test]
fn multiple_url_tags_expand_independently() {
    assert_eq!(
        format("[url=/a]one[/url] and [url=/b]two[/url]"),
        "<a href=\"/a\">one</a> and <a href=\"/b\">two</a>"
    );
}

#[test]
fn unterminated_url_tag_is_left_in_place() {
    assert_eq!(format("broken [url=https://x"), "broken [url=https://x");
}

#[test]
fn unknown_bracket_tags_pass_through() {
    assert_eq!(format("[quote]keep me[/quote]"), "[quote]keep me[/quote]");
}

// ── Entities ─────────────────────────────────────────────────────

#[test]
fn named_entities_decode() {
    assert_eq!(
        format("&lt;tag&gt; &quot;quoted&quot; it&#39;s"),
        "<tag> \"quoted\" it's"
    );
}

#[test]
fn nbsp_decodes_to_non_breaking_space() {
    assert_eq!(format("12&nbsp;V"), "12\u{a0}V");
}

#[test]
fn amp_decodes() {
    assert_eq!(format("nuts &amp; bolts"), "nuts & bolts");
}

#[test]
fn double_encoded_entity_decodes_one_level() {
    // &amp; runs last, so &amp;lt; must come out as &lt;, not <.
    assert_eq!(format("&amp;lt;kept&amp;gt;"), "&lt;kept&gt;");
}

// ── Pipeline ─────────────────────────────────────────────────────

#[test]
fn full_legacy_blob_normalizes() {
    let legacy = "  [b]Voltek[/b] dyno runs\\n\\n\\nBook via [url=/contact]contact[/url] &amp; save 10%  ";
    assert_eq!(
        format(legacy),
        "<strong>Voltek</strong> dyno runs\n\nBook via <a href=\"/contact\">contact</a> & save 10%"
    );
}

#[test]
fn plain_text_is_untouched() {
    assert_eq!(format("Plain service description."), "Plain service description.");
}

// ── Detection ────────────────────────────────────────────────────

#[test]
fn looks_legacy_spots_markers() {
    let formatter = ContentFormatter;
    assert!(formatter.looks_legacy("has [b]markup[/b]"));
    assert!(formatter.looks_legacy("escaped\\nnewline"));
    assert!(formatter.looks_legacy("nuts &amp; bolts"));
    assert!(formatter.looks_legacy("[url=/x]link[/url]"));
}

#[test]
fn looks_legacy_ignores_clean_text() {
    let formatter = ContentFormatter;
    assert!(!formatter.looks_legacy("Perfectly ordinary text."));
    assert!(!formatter.looks_legacy("<strong>already html</strong>"));
}
