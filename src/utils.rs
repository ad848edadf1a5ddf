/// Millisecond-resolution revision marker, unique enough to force a spec
/// diff between two reconciliation passes.
pub fn get_revision() -> String {
    chrono::Utc::now().timestamp_millis().to_string()
}
