// End-to-end identification scenarios
//
// A proxy on the client side, a loopback relay in the middle and the
// scripted backend on the server side.

mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use audioid_relay::{
    Channel, IdentifySession, IdentifyStatus, ScriptedSessionFactory, SessionFactory, SessionOptions,
};
use common::{loopback_proxies, silent_frame, wait_for_status};
use tokio::sync::broadcast::error::TryRecvError;

#[tokio::test]
async fn test_identify_silence_end_to_end() -> Result<()> {
    // Setup: completion only happens on the finalize sample
    let backend = Arc::new(ScriptedSessionFactory::new(1000));
    let (channel, proxies) = loopback_proxies(backend.clone());

    let session = proxies.create_session(SessionOptions::new(44100, 16, 2)).await?;
    let mut events = session.subscribe();

    for _ in 0..130 {
        session.add_audio_sample(Some(silent_frame())).await;
    }
    session.add_audio_sample(None).await;

    let mut completions = 0;
    let mut seen = Vec::new();
    tokio::time::timeout(common::WAIT, async {
        while let Ok(event) = events.recv().await {
            seen.push(event.status);
            if event.status == IdentifyStatus::Complete {
                completions += 1;
                break;
            }
        }
    })
    .await?;

    // Give any duplicate a chance to show up
    tokio::time::sleep(Duration::from_millis(100)).await;
    loop {
        match events.try_recv() {
            Ok(event) if event.status == IdentifyStatus::Complete => completions += 1,
            Ok(_) => {}
            Err(TryRecvError::Empty) => break,
            Err(e) => return Err(e.into()),
        }
    }

    assert_eq!(completions, 1);
    assert_eq!(seen, vec![IdentifyStatus::Incomplete, IdentifyStatus::Complete]);
    assert_eq!(session.status(), IdentifyStatus::Complete);

    let tracks = session.tracks().await;
    assert!(!tracks.is_empty());
    assert!(tracks[0].duration_ms > 0);
    // 130 frames of 4096 bytes at 176400 bytes/s is a little over 3 seconds
    assert!(tracks[0].current_position_ms >= 3000);

    assert_eq!(backend.sessions().await[0].frames_received().await, 130);

    session.end().await;
    assert!(!channel.is_open());

    Ok(())
}

#[tokio::test]
async fn test_multiple_tracks_end_to_end() -> Result<()> {
    let backend = Arc::new(ScriptedSessionFactory::new(20).with_track_count(4));
    let (_channel, proxies) = loopback_proxies(backend);

    let session = proxies.create_proxy(SessionOptions::new(44100, 16, 2));
    let status = session.watch_status();

    for _ in 0..20 {
        session.add_audio_sample(Some(silent_frame())).await;
    }
    wait_for_status(status, IdentifyStatus::Complete).await?;

    let tracks = session.tracks().await;
    assert_eq!(tracks.len(), 4);
    for track in &tracks {
        assert!(!track.title.is_empty());
        assert!(!track.album.is_empty());
        assert!(!track.artist.is_empty());
    }

    Ok(())
}

#[tokio::test]
async fn test_backend_error_reaches_proxy_as_status() -> Result<()> {
    let backend = Arc::new(ScriptedSessionFactory::new(5).failing_with_error());
    let (channel, proxies) = loopback_proxies(backend);

    let session = proxies.create_proxy(SessionOptions::default());
    let status = session.watch_status();

    for _ in 0..5 {
        session.add_audio_sample(Some(silent_frame())).await;
    }
    session.flush().await?;

    wait_for_status(status, IdentifyStatus::Error).await?;
    assert!(session.tracks().await.is_empty());

    // A backend failure is not a transport failure
    assert!(channel.is_open());
    assert_eq!(channel.open_count(), 1);

    Ok(())
}

#[tokio::test]
async fn test_proxies_share_one_channel() -> Result<()> {
    let backend = Arc::new(ScriptedSessionFactory::new(3));
    let (channel, proxies) = loopback_proxies(backend.clone());

    let fast = proxies.create_proxy(SessionOptions::default());
    let slow = proxies.create_proxy(SessionOptions::default());
    let idle = proxies.create_proxy(SessionOptions::default());
    let fast_status = fast.watch_status();

    for _ in 0..3 {
        fast.add_audio_sample(Some(silent_frame())).await;
    }
    slow.add_audio_sample(Some(silent_frame())).await;
    fast.flush().await?;
    slow.flush().await?;

    wait_for_status(fast_status, IdentifyStatus::Complete).await?;
    wait_for_status(slow.watch_status(), IdentifyStatus::Incomplete).await?;

    assert_eq!(slow.status(), IdentifyStatus::Incomplete);
    assert!(slow.tracks().await.is_empty());
    assert_eq!(idle.status(), IdentifyStatus::Invalid);

    assert_eq!(channel.open_count(), 1);
    assert_eq!(backend.sessions().await.len(), 2);
    assert_eq!(proxies.client().route_count(), 2);

    // The channel stays up until the last routed session ends
    fast.end().await;
    assert!(channel.is_open());
    slow.end().await;
    assert!(!channel.is_open());

    Ok(())
}

#[tokio::test]
async fn test_samples_after_complete_are_not_forwarded() -> Result<()> {
    let backend = Arc::new(ScriptedSessionFactory::new(2));
    let (_channel, proxies) = loopback_proxies(backend.clone());

    let session = proxies.create_proxy(SessionOptions::default());
    let status = session.watch_status();

    session.add_audio_sample(Some(silent_frame())).await;
    session.add_audio_sample(Some(silent_frame())).await;
    session.flush().await?;
    wait_for_status(status, IdentifyStatus::Complete).await?;

    for _ in 0..5 {
        session.add_audio_sample(Some(silent_frame())).await;
    }
    session.flush().await?;

    assert_eq!(session.pending_samples(), 0);
    assert_eq!(backend.sessions().await[0].frames_received().await, 2);

    Ok(())
}
