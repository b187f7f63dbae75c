//! Pending-queue projection.
//!
//! The queue is never cached: it is recomputed from `list_pending()` on every
//! notification, so it cannot drift from the store of record.
use std::cmp::Ordering;

use playout_proto::request::{MediaKind, MediaRequest};

/// Playback order: announcements before songs, then oldest submission first.
/// `id` breaks the (store-prevented) case of equal timestamps so the order is
/// total.
pub fn playback_order(a: &MediaRequest, b: &MediaRequest) -> Ordering {
    a.kind
        .cmp(&b.kind)
        .then_with(|| a.submitted_at.cmp(&b.submitted_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Order the pending set.  Rows that are not `Pending` are dropped.
pub fn project(requests: impl IntoIterator<Item = MediaRequest>) -> Vec<MediaRequest> {
    let mut queue: Vec<MediaRequest> = requests
        .into_iter()
        .filter(|r| r.status.is_pending())
        .collect();
    queue.sort_by(playback_order);
    queue
}

pub fn has_announcement(queue: &[MediaRequest]) -> bool {
    queue.iter().any(|r| r.kind == MediaKind::Announcement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use playout_proto::request::{Completion, RequestId, RequestStatus};

    fn request(id: u64, kind: MediaKind, at_secs: i64) -> MediaRequest {
        MediaRequest {
            id: RequestId(id),
            kind,
            payload: format!("payload {id}"),
            status: RequestStatus::Pending,
            submitted_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(at_secs),
            requester_id: "team".into(),
            started_at: None,
            finished_at: None,
        }
    }

    fn ids(queue: &[MediaRequest]) -> Vec<u64> {
        queue.iter().map(|r| r.id.0).collect()
    }

    #[test]
    fn test_announcements_jump_ahead_of_older_songs() {
        let queue = project(vec![
            request(1, MediaKind::Song, 0),
            request(2, MediaKind::Song, 1),
            request(3, MediaKind::Announcement, 2),
            request(4, MediaKind::Announcement, 3),
        ]);
        assert_eq!(ids(&queue), vec![3, 4, 1, 2]);
        assert!(has_announcement(&queue));
    }

    #[test]
    fn test_within_class_oldest_first() {
        let queue = project(vec![
            request(7, MediaKind::Song, 9),
            request(5, MediaKind::Song, 3),
            request(6, MediaKind::Song, 5),
        ]);
        assert_eq!(ids(&queue), vec![5, 6, 7]);
        assert!(!has_announcement(&queue));
    }

    #[test]
    fn test_non_pending_rows_are_dropped() {
        let mut playing = request(1, MediaKind::Song, 0);
        playing.status = RequestStatus::Playing;
        let mut done = request(2, MediaKind::Announcement, 1);
        done.status = RequestStatus::Completed(Completion::Played);
        let queue = project(vec![playing, done, request(3, MediaKind::Song, 2)]);
        assert_eq!(ids(&queue), vec![3]);
    }

    #[test]
    fn test_projection_is_idempotent_and_input_order_independent() {
        let rows = vec![
            request(4, MediaKind::Song, 4),
            request(1, MediaKind::Announcement, 7),
            request(2, MediaKind::Song, 1),
            request(3, MediaKind::Announcement, 2),
        ];
        let once = project(rows.clone());
        let twice = project(once.clone());
        let mut reversed = rows;
        reversed.reverse();
        assert_eq!(once, twice);
        assert_eq!(once, project(reversed));
        assert_eq!(ids(&once), vec![3, 1, 2, 4]);
    }

    #[test]
    fn test_equal_timestamps_fall_back_to_id() {
        let queue = project(vec![
            request(9, MediaKind::Song, 0),
            request(8, MediaKind::Song, 0),
        ]);
        assert_eq!(ids(&queue), vec![8, 9]);
    }
}
