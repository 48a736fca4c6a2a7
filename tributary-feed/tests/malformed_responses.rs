//! Every parser rejects unreadable output with the raw response attached.

use rstest::rstest;
use tributary_feed::{xml, FeedError};

#[rstest]
#[case::history(xml::parse_history("<AcResponse><transaction").map(|_| ()))]
#[case::ancestor(xml::parse_ancestor(r#"<acResponse><element stream="3"/></acResponse>"#).map(|_| ()))]
#[case::parent(xml::parse_parent_stream("<AcResponse/>").map(|_| ()))]
#[case::feed(xml::parse_change_feed("<acResponse><Change/></acResponse>").map(|_| ()))]
#[case::pending(xml::parse_pending(r#"<AcResponse><transaction id="x"/></AcResponse>"#).map(|_| ()))]
#[case::last(xml::parse_last_transaction("").map(|_| ()))]
fn unreadable_response_is_malformed(#[case] result: Result<(), FeedError>) {
    match result {
        Err(FeedError::MalformedResponse { .. }) => {}
        other => panic!("expected MalformedResponse, got {other:?}"),
    }
}

#[test]
fn unescaped_comment_survives_parsing() {
    let raw = r#"<AcResponse>
  <transaction id="12" time="1300000000" user="ops" type="promote">
    <comment>merge Q&A fixes & docs</comment>
  </transaction>
</AcResponse>"#;
    let history = xml::parse_history(raw).expect("parse");
    assert_eq!(history.transactions[0].comment, "merge Q&A fixes & docs");
}
