//! Leaving voice channels nobody listens in.
//!
//! When the bot is left alone in its voice channel, a watcher waits for
//! someone to join again. If nobody does within the idle timeout, the session
//! is reset. At most one watcher runs per session.

use std::{sync::Arc, time::Duration};

use crate::{player::Player, session::Session};

/// Waits up to `timeout` for the bot's voice channel to be occupied again,
/// or left, or for the session to be reset meanwhile. Resets the session
/// otherwise.
///
/// Returns whether the session was reset.
pub async fn watch(player: Arc<Player>, session: Arc<Session>, timeout: Duration) -> bool {
    if !session.begin_leave() {
        trace!("guild {}: idle watcher already pending", session.guild());
        return false;
    }

    let Some(reset) = session.until_reset() else {
        trace!("guild {}: not in a voice channel", session.guild());
        session.end_leave();
        return false;
    };

    debug!(
        "guild {}: alone in voice channel, leaving in {}s",
        session.guild(),
        timeout.as_secs()
    );

    let mut occupancy = session.occupancy();
    let outcome = tokio::time::timeout(timeout, async {
        tokio::select! {
            // The sender lives as long as the session does.
            _ = occupancy.wait_for(|members| *members != 1) => {}
            () = reset.cancelled() => {}
        }
    })
    .await;
    session.end_leave();

    if outcome.is_ok() {
        debug!("guild {}: no longer idle", session.guild());
        return false;
    }

    info!("guild {}: leaving idle voice channel", session.guild());
    player.reset(&session).await;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::ResolverCache,
        chat::{ChannelId, GuildId},
        model::Track,
        queue::Placement,
        store::Store,
        testing::{FakeChat, FakeProbe, FakeResolver, FakeVoice},
    };

    const IDLE: Duration = Duration::from_secs(300);

    async fn connected() -> (Arc<Player>, Arc<Session>, Arc<FakeVoice>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let voice = Arc::new(FakeVoice::new());
        let cache = Arc::new(ResolverCache::new(
            Arc::new(FakeResolver::new()),
            Store::new(dir.path()),
            Duration::from_secs(180),
        ));
        let player = Arc::new(Player::new(
            Arc::new(FakeChat::new()),
            voice.clone(),
            cache,
            Arc::new(FakeProbe::new()),
        ));

        let session = Arc::new(Session::new(GuildId(1)));
        session.state().queue.enqueue(
            vec![Track::new("https://youtu.be/a", "a")],
            Placement::Append,
        );
        player.connect(&session, ChannelId(20)).await.unwrap();
        session.set_occupancy(1);

        (player, session, voice, dir)
    }

    #[tokio::test(start_paused = true)]
    async fn empty_channels_are_left_after_the_timeout() {
        let (player, session, voice, _dir) = connected().await;

        let started = tokio::time::Instant::now();
        assert!(watch(player, session.clone(), IDLE).await);

        assert!(started.elapsed() >= IDLE);
        assert!(session.is_dormant());
        assert_eq!(voice.last_connection().unwrap().disconnects(), 1);
        assert!(!session.is_leave_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn returning_listeners_cancel_the_leave() {
        let (player, session, voice, _dir) = connected().await;

        let watcher = tokio::spawn(watch(player, session.clone(), IDLE));
        tokio::time::sleep(Duration::from_secs(60)).await;
        session.set_occupancy(2);

        assert!(!watcher.await.unwrap());
        assert!(!session.is_dormant());
        assert_eq!(voice.last_connection().unwrap().disconnects(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn resets_end_the_wait() {
        let (player, session, voice, _dir) = connected().await;

        let watcher = tokio::spawn(watch(player.clone(), session.clone(), IDLE));
        tokio::time::sleep(Duration::from_secs(60)).await;
        player.reset(&session).await;

        let started = tokio::time::Instant::now();
        assert!(!watcher.await.unwrap());
        assert!(started.elapsed() < IDLE);
        assert_eq!(voice.last_connection().unwrap().disconnects(), 1);
        assert!(!session.is_leave_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnected_sessions_are_not_watched() {
        let (player, session, _voice, _dir) = connected().await;
        player.reset(&session).await;

        assert!(!watch(player, session.clone(), IDLE).await);
        assert!(!session.is_leave_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn one_watcher_at_a_time() {
        let (player, session, _voice, _dir) = connected().await;

        let first = tokio::spawn(watch(player.clone(), session.clone(), IDLE));
        tokio::task::yield_now().await;
        assert!(session.is_leave_pending());
        assert!(!watch(player, session.clone(), IDLE).await);

        assert!(first.await.unwrap());
    }
}
