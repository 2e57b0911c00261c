// tests/participant_records.rs

//! Participant records survive a session restart: filesystem store plus
//! historical data markers.

use std::error::Error;
use std::fs;

use psysession::engine::mock::MockEngine;
use psysession::{Session, SessionConfig};
use psysession_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn records_persist_across_restarts_and_merge_with_data_markers() -> TestResult {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let data = dir.path().join("data");
    fs::create_dir_all(&data)?;
    for marker in ["Lolo_blue_1.psydat", "Lolo_blue_2.psydat"] {
        fs::write(data.join(marker), b"")?;
    }

    {
        let session = Session::start(
            SessionConfig::new(dir.path()).watch(false),
            Box::new(MockEngine::new()),
        )?;
        // Two completed sessions on disk, so the next free number is 3.
        assert_eq!(session.participant("Lolo")?.next_session, 3);

        session.set_participant_session("Momo", 5)?;
        // Lower values never win.
        session.set_participant_session("Momo", 2)?;
        assert_eq!(session.participant("Momo")?.next_session, 5);
    }

    let store_file = dir.path().join(".psysession").join("participants.json");
    assert!(store_file.exists(), "records should be written to disk");

    let session = Session::start(
        SessionConfig::new(dir.path()).watch(false),
        Box::new(MockEngine::new()),
    )?;
    assert_eq!(session.participant("Momo")?.next_session, 5);
    assert_eq!(session.participant("Lolo")?.next_session, 3);
    Ok(())
}
