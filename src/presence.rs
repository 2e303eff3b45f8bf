//! Cursor presence: positions, send throttling, stable cursor colors.
//!
//! Presence is fire-and-forget fan-out — no versioning, no persistence, no
//! merge. The only intelligence is client-side rate limiting so mouse moves
//! don't flood the wire.

use std::time::{Duration, Instant};

/// A cursor location in page coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CursorPosition {
    pub x: f32,
    pub y: f32,
}

impl CursorPosition {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Coalesces cursor updates to at most one per interval, always keeping the
/// latest position.
#[derive(Debug)]
pub struct CursorThrottle {
    interval: Duration,
    pending: Option<CursorPosition>,
    last_sent: Option<Instant>,
}

impl CursorThrottle {
    /// Default interval matches a smooth-but-cheap 20 updates per second.
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(50);

    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            pending: None,
            last_sent: None,
        }
    }

    /// Record a local cursor move; returns the position to send now, or
    /// `None` if it should wait for the interval.
    pub fn offer(&mut self, position: CursorPosition, now: Instant) -> Option<CursorPosition> {
        match self.last_sent {
            Some(last) if now < last + self.interval => {
                self.pending = Some(position);
                None
            }
            _ => {
                self.last_sent = Some(now);
                self.pending = None;
                Some(position)
            }
        }
    }

    /// Flush a held-back position once the interval has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<CursorPosition> {
        let position = self.pending?;
        match self.last_sent {
            Some(last) if now < last + self.interval => None,
            _ => {
                self.last_sent = Some(now);
                self.pending = None;
                Some(position)
            }
        }
    }

    /// When the held-back position becomes sendable.
    pub fn next_flush(&self) -> Option<Instant> {
        self.pending?;
        Some(match self.last_sent {
            Some(last) => last + self.interval,
            None => Instant::now(),
        })
    }
}

/// Stable RGB cursor color derived from a team label.
///
/// The same label always renders the same color on every client, with the
/// hash spread so adjacent labels don't collide visually.
pub fn cursor_color(team_label: &str) -> [u8; 3] {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in team_label.bytes() {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    // Golden-ratio hue spread, fixed saturation/lightness band.
    let hue = (hash.wrapping_mul(0x9e37_79b9_7f4a_7c15) >> 40) as f32 / (1u64 << 24) as f32;
    hsl_to_rgb(hue, 0.75, 0.55)
}

fn hsl_to_rgb(h: f32, s: f32, l: f32) -> [u8; 3] {
    let c = (1.0 - (2.0 * l - 1.0).abs()) * s;
    let hp = h * 6.0;
    let x = c * (1.0 - (hp % 2.0 - 1.0).abs());
    let (r, g, b) = match hp as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = l - c / 2.0;
    [
        ((r + m) * 255.0) as u8,
        ((g + m) * 255.0) as u8,
        ((b + m) * 255.0) as u8,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_offer_sends_immediately() {
        let mut throttle = CursorThrottle::new(Duration::from_millis(50));
        let now = Instant::now();
        assert!(throttle.offer(CursorPosition::new(1.0, 2.0), now).is_some());
    }

    #[test]
    fn test_rapid_offers_are_held() {
        let mut throttle = CursorThrottle::new(Duration::from_millis(50));
        let t0 = Instant::now();
        throttle.offer(CursorPosition::new(1.0, 1.0), t0);

        assert!(throttle
            .offer(CursorPosition::new(2.0, 2.0), t0 + Duration::from_millis(10))
            .is_none());
        assert!(throttle
            .offer(CursorPosition::new(3.0, 3.0), t0 + Duration::from_millis(20))
            .is_none());

        // Flush releases only the latest position.
        let flushed = throttle.poll(t0 + Duration::from_millis(60)).unwrap();
        assert_eq!(flushed, CursorPosition::new(3.0, 3.0));
        assert!(throttle.poll(t0 + Duration::from_millis(70)).is_none());
    }

    #[test]
    fn test_offer_after_interval_sends() {
        let mut throttle = CursorThrottle::new(Duration::from_millis(50));
        let t0 = Instant::now();
        throttle.offer(CursorPosition::new(1.0, 1.0), t0);
        let sent = throttle.offer(CursorPosition::new(2.0, 2.0), t0 + Duration::from_millis(60));
        assert_eq!(sent, Some(CursorPosition::new(2.0, 2.0)));
    }

    #[test]
    fn test_next_flush_tracks_pending() {
        let mut throttle = CursorThrottle::new(Duration::from_millis(50));
        let t0 = Instant::now();
        assert!(throttle.next_flush().is_none());
        throttle.offer(CursorPosition::new(1.0, 1.0), t0);
        throttle.offer(CursorPosition::new(2.0, 2.0), t0 + Duration::from_millis(5));
        assert_eq!(throttle.next_flush(), Some(t0 + Duration::from_millis(50)));
    }

    #[test]
    fn test_cursor_color_stable_and_distinct() {
        assert_eq!(cursor_color("team7"), cursor_color("team7"));
        assert_ne!(cursor_color("team7"), cursor_color("team8"));
    }

    #[test]
    fn test_cursor_color_in_visible_band() {
        for label in ["a", "team1", "Полоса", "a-rather-long-team-name"] {
            let [r, g, b] = cursor_color(label);
            // Mid-lightness HSL never hits full black or full white.
            assert!(r as u16 + g as u16 + b as u16 > 60, "{label} too dark");
            assert!((r as u16) < 250 || (g as u16) < 250 || (b as u16) < 250);
        }
    }
}
