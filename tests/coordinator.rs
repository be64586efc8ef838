//! Detection pipeline integration tests
//!
//! Drives the coordinator with synthetic detection sequences and explicit
//! timestamps; no session, no sleeping.

use std::sync::Arc;
use std::time::{Duration, Instant};

use vision_narrator::geometry::{ColorFamily, Shade, classify_aspect};
use vision_narrator::{
    AnnouncementThrottle, BoundingBox, Detection, DetectionCoordinator, Frame, NarrationMode,
    NarratorConfig, OverlayCommand, OverlayStyle, classify_color, contains_center,
    estimate_distance_meters,
};

mod common;

use common::{GEOMETRY, cup, held, person};

fn coordinator() -> DetectionCoordinator {
    DetectionCoordinator::new(Arc::new(NarratorConfig::default()))
}

fn frame() -> Frame {
    Frame::blank(GEOMETRY)
}

fn style_of(overlay: &[OverlayCommand], label_caption: &str) -> Option<OverlayStyle> {
    overlay.iter().find_map(|cmd| match cmd {
        OverlayCommand::Box { style, caption, .. } if caption.starts_with(label_caption) => {
            Some(*style)
        }
        _ => None,
    })
}

#[test]
fn test_throttle_cooldown_property() {
    let start = Instant::now();
    for millis in [1u64, 250, 7000, 12_000] {
        let cooldown = Duration::from_millis(millis);
        let mut throttle = AnnouncementThrottle::new();
        assert!(throttle.try_acquire_at("sighting:cup", cooldown, start));
        assert!(!throttle.try_acquire_at("sighting:cup", cooldown, start + cooldown / 2));
        assert!(!throttle.try_acquire_at(
            "sighting:cup",
            cooldown,
            start + cooldown - Duration::from_nanos(1)
        ));
        assert!(throttle.try_acquire_at("sighting:cup", cooldown, start + cooldown));
    }
}

#[test]
fn test_distance_halves_when_pixel_height_doubles() {
    for pixels in [10.0, 55.0, 120.0, 300.0] {
        let near = estimate_distance_meters(1.7, pixels * 2.0, 600.0).unwrap();
        let far = estimate_distance_meters(1.7, pixels, 600.0).unwrap();
        assert!(near < far);
        assert!((far / near - 2.0).abs() < 1e-9);
    }
}

#[test]
fn test_color_regressions() {
    assert_eq!(classify_color(0, 0, 0).family, ColorFamily::Black);
    assert_eq!(classify_color(255, 255, 255).family, ColorFamily::White);

    let navy = classify_color(10, 10, 200);
    assert_eq!(navy.family, ColorFamily::Blue);
    assert_eq!(navy.shade, Some(Shade::Dark));

    // Total over the whole cube
    for r in (0..=255).step_by(17) {
        for g in (0..=255).step_by(17) {
            for b in (0..=255).step_by(17) {
                let (r, g, b) = (r as u8, g as u8, b as u8);
                assert_eq!(classify_color(r, g, b), classify_color(r, g, b));
            }
        }
    }
}

#[test]
fn test_hand_zone_containment() {
    let body = person(100.0).bounding_box;
    assert!(contains_center(&body, &held("cup", 100.0).bounding_box));

    let above_head = BoundingBox::new(180.0, 0.0, 20.0, 20.0);
    assert!(!contains_center(&body, &above_head));
}

#[test]
fn test_aspect_threshold() {
    let bat = BoundingBox::new(0.0, 0.0, 20.0, 90.0);
    assert!(classify_aspect(&bat, 2.0).elongated);
    assert!(!classify_aspect(&bat, 5.0).elongated);
}

#[test]
fn test_person_flicker_then_steady_count() {
    let mut c = coordinator();
    let t0 = Instant::now();
    let at = |ms: u64| t0 + Duration::from_millis(ms);
    let crowd = |n: usize| -> Vec<Detection> { (0..n).map(|i| person(i as f64 * 210.0)).collect() };

    let mut spoken = Vec::new();
    // 0 → 1 → 2 → 1 every 500ms, each shorter than the window
    for (i, n) in [0usize, 1, 2, 1].into_iter().enumerate() {
        let plan = c.process_at(&frame(), &crowd(n), NarrationMode::Quiet, at(i as u64 * 500));
        spoken.extend(plan.announcements);
    }
    assert!(spoken.is_empty());

    // Hold one person for 2100ms, ticking every 100ms
    for step in 1..=21u64 {
        let plan = c.process_at(&frame(), &crowd(1), NarrationMode::Quiet, at(1500 + step * 100));
        spoken.extend(plan.announcements);
    }
    assert_eq!(spoken.len(), 1);
    assert_eq!(spoken[0].text, "Veo una persona");
    assert!(!spoken[0].urgent);
}

#[test]
fn test_knife_near_hand_end_to_end() {
    let mut c = coordinator();
    let now = Instant::now();
    let batch = vec![held("knife", 0.0), person(0.0)];

    let plan = c.process_at(&frame(), &batch, NarrationMode::Quiet, now);

    assert!(plan.has_alert());
    let alert = &plan.announcements[0];
    assert!(alert.urgent);
    assert_eq!(alert.text, "Alerta: persona con cuchillo");

    assert_eq!(style_of(&plan.overlay, "CUCHILLO"), Some(OverlayStyle::Threat));
    assert_eq!(style_of(&plan.overlay, "PERSONA"), Some(OverlayStyle::Threat));
    assert_eq!(OverlayStyle::Threat.color(), "#ff0000");

    assert_eq!(
        c.throttle().expires_at(&alert.key),
        Some(now + Duration::from_millis(9000))
    );
}

#[test]
fn test_quiet_and_verbose_captions() {
    let mut c = coordinator();
    let now = Instant::now();

    let quiet = c.process_at(&frame(), &[cup()], NarrationMode::Quiet, now);
    assert_eq!(style_of(&quiet.overlay, "TAZA"), Some(OverlayStyle::Object));
    assert_eq!(quiet.announcements[0].text, "Veo: taza");

    c.reset();
    let verbose = c.process_at(&frame(), &[cup()], NarrationMode::Verbose, now);
    // 0.1 m * 600 px / 60 px
    assert_eq!(verbose.announcements[0].text, "Veo: taza a 1.0 metros");
}

#[test]
fn test_distinct_facts_announce_independently() {
    let mut c = coordinator();
    let now = Instant::now();
    let book = Detection::new("book", 0.8, BoundingBox::new(400.0, 20.0, 30.0, 40.0));

    let plan = c.process_at(&frame(), &[cup(), book], NarrationMode::Quiet, now);
    let mut texts: Vec<&str> = plan.announcements.iter().map(|a| a.text.as_str()).collect();
    texts.sort_unstable();
    assert_eq!(texts, vec!["Veo: libro", "Veo: taza"]);
    assert_eq!(plan.labels, vec!["libro".to_string(), "taza".to_string()]);
}
