fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use partflow_protocol::{ClientMessage, JobRef, PartEntry, ServerMessage, UploadInfo};
    use partflow_transfer::PartitionModel;

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Deserializes a fixture into a Rust type, re-serializes it, and compares
    /// the JSON values.
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));
        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  server: {fixture}\n  Rust:   {reserialized}"
        );
        parsed
    }

    #[test]
    fn fixture_upload_info() {
        let info = roundtrip_test::<UploadInfo>("upload_info.json");
        assert!(matches!(info.parts[0], PartEntry::Range(_)));
        assert!(matches!(info.parts[1], PartEntry::Single(_)));
        assert_eq!(info.progress.unwrap().uid, "oseh_j_Qm1");
    }

    #[test]
    fn fixture_upload_info_partitions() {
        let info: UploadInfo = serde_json::from_value(load_fixture("upload_info.json")).unwrap();
        let model = PartitionModel::from_info(&info).unwrap();
        assert_eq!(model.end_part_number(), 5);
        assert_eq!(model.total_bytes(), 23_068_672);
        assert_eq!(model.get_part(5).unwrap().start_byte, 20_971_520);
    }

    #[test]
    fn fixture_upload_info_no_progress() {
        let info = roundtrip_test::<UploadInfo>("upload_info_no_progress.json");
        assert!(info.progress.is_none());
    }

    #[test]
    fn fixture_authorize() {
        let msg = roundtrip_test::<ClientMessage>("authorize.json");
        let job = JobRef {
            uid: "oseh_j_Qm1".into(),
            jwt: "eyJhbGciOiJIUzI1NiJ9.job".into(),
        };
        assert_eq!(msg, ClientMessage::authorize(&job));
    }

    #[test]
    fn fixture_auth_response() {
        let msg = roundtrip_test::<ServerMessage>("auth_response.json");
        assert_eq!(msg, ServerMessage::AuthResponse { success: true });
    }

    #[test]
    fn fixture_event_batch() {
        let msg = roundtrip_test::<ServerMessage>("event_batch.json");
        let ServerMessage::EventBatch {
            success: true,
            data: Some(batch),
        } = msg
        else {
            panic!("expected a successful event batch");
        };
        assert_eq!(batch.events.len(), 3);
        assert_eq!(batch.events[1].spawned_job().unwrap().name, "thumbnails");
        assert!(!batch.events[1].is_final());
        assert!(batch.events[2].is_final());
        assert!(batch.events[2].succeeded());
        assert_eq!(batch.events[2].display_progress().indicator, None);
    }
}
