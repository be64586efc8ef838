//! Per-frame detection decisions
//!
//! [`DetectionCoordinator`] turns one frame's detections into a [`FramePlan`]:
//! what to draw and what to say. It owns the announcement throttle, the
//! person-count stability tracker and the held-object condition tracker. It
//! performs no I/O; the session applies the plan.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{NarratorConfig, Phrasebook};
use crate::detection::{Detection, Frame};
use crate::geometry::{classify_aspect, contains_center};
use crate::overlay::{OverlayCommand, OverlayStyle};
use crate::throttle::{AnnouncementKey, AnnouncementThrottle};
use crate::voice::NarrationMode;

/// Throttle key for the confirmed person count
const PERSON_COUNT_KEY: &str = "persons";

/// Something to say this tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub key: AnnouncementKey,
    pub text: String,
    /// Preempts current speech and plays the alert tone
    pub urgent: bool,
}

/// Everything the coordinator decided for one frame
#[derive(Debug, Clone, Default)]
pub struct FramePlan {
    /// Overlay commands, starting with a clear
    pub overlay: Vec<OverlayCommand>,
    /// Announcements that passed the throttle, urgent ones first
    pub announcements: Vec<Announcement>,
    /// Spoken names of everything above the score threshold, sorted and unique
    pub labels: Vec<String>,
}

impl FramePlan {
    /// Whether any announcement is urgent
    #[must_use]
    pub fn has_alert(&self) -> bool {
        self.announcements.iter().any(|a| a.urgent)
    }
}

/// Confirms a person count only after it stops changing
#[derive(Debug, Default)]
pub struct PersonCountTracker {
    pending: usize,
    changed_at: Option<Instant>,
    confirmed: usize,
}

impl PersonCountTracker {
    /// Record this tick's count
    ///
    /// Returns the count when it has just become confirmed: unchanged for at
    /// least `window` and different from the last confirmed count.
    pub fn observe(&mut self, count: usize, now: Instant, window: Duration) -> Option<usize> {
        let Some(changed_at) = self.changed_at else {
            self.pending = count;
            self.changed_at = Some(now);
            return None;
        };

        if count != self.pending {
            self.pending = count;
            self.changed_at = Some(now);
            return None;
        }

        if now.duration_since(changed_at) >= window && self.pending != self.confirmed {
            self.confirmed = self.pending;
            return Some(self.confirmed);
        }
        None
    }

    /// Last confirmed count
    #[must_use]
    pub const fn confirmed(&self) -> usize {
        self.confirmed
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// When a held condition began and when it was last seen
#[derive(Debug, Clone, Copy)]
struct HeldSpan {
    since: Instant,
    last_seen: Instant,
}

/// An object found in a person's hand zone
struct HeldObject<'a> {
    person: &'a Detection,
    object: &'a Detection,
    threat: bool,
}

/// Decides what to draw and announce for each frame
pub struct DetectionCoordinator {
    config: Arc<NarratorConfig>,
    throttle: AnnouncementThrottle,
    persons: PersonCountTracker,
    /// Held conditions not yet ended; a gap shorter than the retrigger guard does not end one
    held: HashMap<AnnouncementKey, HeldSpan>,
    /// Held keys announced at least once this session
    alerted: HashSet<AnnouncementKey>,
    labels: Vec<String>,
}

impl DetectionCoordinator {
    #[must_use]
    pub fn new(config: Arc<NarratorConfig>) -> Self {
        Self {
            config,
            throttle: AnnouncementThrottle::new(),
            persons: PersonCountTracker::default(),
            held: HashMap::new(),
            alerted: HashSet::new(),
            labels: Vec::new(),
        }
    }

    /// Plan one frame using the current time
    pub fn process(&mut self, frame: &Frame, detections: &[Detection], mode: NarrationMode) -> FramePlan {
        self.process_at(frame, detections, mode, Instant::now())
    }

    /// Plan one frame at `now`
    pub fn process_at(
        &mut self,
        frame: &Frame,
        detections: &[Detection],
        mode: NarrationMode,
        now: Instant,
    ) -> FramePlan {
        let config = Arc::clone(&self.config);
        let threshold = config.detection.score_threshold;
        let verbose = mode == NarrationMode::Verbose;

        let visible: Vec<&Detection> = detections.iter().filter(|d| d.score > threshold).collect();
        let (people, others): (Vec<&Detection>, Vec<&Detection>) =
            visible.iter().copied().partition(|d| d.is_person());

        let held = find_held(&config, &people, &others);

        let mut plan = FramePlan {
            overlay: vec![OverlayCommand::Clear],
            ..FramePlan::default()
        };

        // People, with the style of whatever they hold
        for person in &people {
            let style = held
                .iter()
                .filter(|h| std::ptr::eq(h.person, *person))
                .map(|h| if h.threat { OverlayStyle::Threat } else { OverlayStyle::Held })
                .max_by_key(|s| *s == OverlayStyle::Threat)
                .unwrap_or(OverlayStyle::Person);
            let caption = self.caption(frame, person, verbose, false);
            plan.overlay
                .push(OverlayCommand::boxed(person.bounding_box, style, caption));
        }

        for h in &held {
            let style = if h.threat { OverlayStyle::Threat } else { OverlayStyle::Held };
            let caption = self.caption(frame, h.object, verbose, false);
            plan.overlay
                .push(OverlayCommand::boxed(h.object.bounding_box, style, caption));
        }

        let loose: Vec<&Detection> = others
            .iter()
            .copied()
            .filter(|d| !held.iter().any(|h| std::ptr::eq(h.object, *d)))
            .collect();
        for object in &loose {
            let caption = self.caption(frame, object, verbose, true);
            plan.overlay
                .push(OverlayCommand::boxed(object.bounding_box, OverlayStyle::Object, caption));
        }

        // Announcements, urgent first
        let mut announcements = self.held_announcements(&held, now);
        if let Some(count) = self.persons.observe(people.len(), now, config.announce.stability_window) {
            if let Some(a) = self.person_count_announcement(count, now) {
                announcements.push(a);
            }
        }
        for object in &loose {
            let key = format!("sighting:{}", object.label.to_lowercase());
            if !self.throttle.try_acquire_at(&key, config.announce.sighting_cooldown, now) {
                continue;
            }
            let name = config.spoken_label(&object.label);
            let mut text = Phrasebook::render(&config.phrases.sighting, &[("object", name.as_str())]);
            if verbose {
                for detail in self.details(frame, object) {
                    text.push(' ');
                    text.push_str(&detail);
                }
            }
            announcements.push(Announcement {
                key,
                text,
                urgent: false,
            });
        }
        announcements.sort_by_key(|a| !a.urgent);
        plan.announcements = announcements;

        let mut labels: Vec<String> = visible.iter().map(|d| config.spoken_label(&d.label)).collect();
        labels.sort();
        labels.dedup();
        self.labels.clone_from(&labels);
        plan.labels = labels;

        for a in &plan.announcements {
            tracing::debug!(key = %a.key, text = %a.text, urgent = a.urgent, "announcement planned");
        }
        plan
    }

    /// Track held conditions: release ended ones, announce eligible ones
    ///
    /// A condition ends only after it has been missing for the retrigger
    /// guard, so a detector dropout of a frame or two keeps its cooldown.
    fn held_announcements(&mut self, held: &[HeldObject<'_>], now: Instant) -> Vec<Announcement> {
        let config = Arc::clone(&self.config);
        let guard = config.announce.retrigger_guard;
        let mut active: HashMap<AnnouncementKey, &HeldObject<'_>> = HashMap::new();
        for h in held {
            let key = held_key(h);
            // Two people holding the same kind of object share one key
            active.entry(key).or_insert(h);
        }

        let ended: Vec<AnnouncementKey> = self
            .held
            .iter()
            .filter(|(k, span)| !active.contains_key(*k) && now.duration_since(span.last_seen) >= guard)
            .map(|(k, _)| k.clone())
            .collect();
        for key in ended {
            tracing::debug!(key = %key, "held condition ended");
            self.held.remove(&key);
            self.throttle.release(&key);
        }

        let mut out = Vec::new();
        for (key, h) in active {
            let span = self.held.entry(key.clone()).or_insert(HeldSpan {
                since: now,
                last_seen: now,
            });
            span.last_seen = now;
            let since = span.since;
            let rearmed = !self.alerted.contains(&key) || now.duration_since(since) >= guard;
            if !rearmed {
                continue;
            }

            let cooldown = if h.threat {
                config.announce.alert_cooldown
            } else {
                config.announce.held_cooldown
            };
            if !self.throttle.try_acquire_at(&key, cooldown, now) {
                continue;
            }

            self.alerted.insert(key.clone());
            let template = if h.threat {
                &config.phrases.threat
            } else {
                &config.phrases.held
            };
            let name = config.spoken_label(&h.object.label);
            let text = Phrasebook::render(template, &[("object", name.as_str())]);
            if h.threat {
                tracing::warn!(label = %h.object.label, score = h.object.score, "threat held near person");
            }
            out.push(Announcement {
                key,
                text,
                urgent: h.threat,
            });
        }
        out.sort_by(|a, b| b.urgent.cmp(&a.urgent).then_with(|| a.key.cmp(&b.key)));
        out
    }

    fn person_count_announcement(&mut self, count: usize, now: Instant) -> Option<Announcement> {
        let config = &self.config;
        tracing::debug!(count, "person count confirmed");
        if count == 0 {
            return None;
        }
        if !self
            .throttle
            .try_acquire_at(PERSON_COUNT_KEY, config.announce.stability_window, now)
        {
            return None;
        }
        let text = if count == 1 {
            config.phrases.one_person.clone()
        } else {
            let count = count.to_string();
            Phrasebook::render(&config.phrases.many_persons, &[("count", count.as_str())])
        };
        Some(Announcement {
            key: PERSON_COUNT_KEY.to_string(),
            text,
            urgent: false,
        })
    }

    /// Overlay caption: upper-cased spoken name, plus distance in verbose mode
    fn caption(&self, frame: &Frame, detection: &Detection, verbose: bool, with_color: bool) -> String {
        let mut caption = self.config.spoken_label(&detection.label).to_uppercase();
        if verbose {
            if let Some(d) = self.distance(detection) {
                caption.push_str(&format!(" {d:.1} m"));
            }
            if with_color {
                if let Some(color) = self.color(frame, detection) {
                    caption.push(' ');
                    caption.push_str(&color.to_uppercase());
                }
            }
        }
        caption
    }

    /// Spoken distance and color phrases for a verbose sighting
    fn details(&self, frame: &Frame, detection: &Detection) -> Vec<String> {
        let phrases = &self.config.phrases;
        let mut out = Vec::new();
        if let Some(d) = self.distance(detection) {
            let meters = format!("{d:.1}");
            out.push(Phrasebook::render(&phrases.distance, &[("distance", meters.as_str())]));
        }
        if let Some(color) = self.color(frame, detection) {
            out.push(Phrasebook::render(&phrases.color, &[("color", color.as_str())]));
        }
        out
    }

    fn distance(&self, detection: &Detection) -> Option<f64> {
        self.config
            .detection
            .distance
            .estimate(&detection.label.to_lowercase(), detection.bounding_box.height)
    }

    fn color(&self, frame: &Frame, detection: &Detection) -> Option<String> {
        let (cx, cy) = detection.bounding_box.center();
        let sample = frame.sample_color(cx, cy, self.config.detection.color_sample_radius)?;
        Some(self.config.phrases.color_words(sample.classify()))
    }

    /// Forget every throttle entry and tracked condition (system stop)
    pub fn reset(&mut self) {
        self.throttle.clear();
        self.persons.reset();
        self.held.clear();
        self.alerted.clear();
        self.labels.clear();
    }

    /// Spoken labels seen on the last frame
    #[must_use]
    pub fn current_labels(&self) -> &[String] {
        &self.labels
    }

    #[must_use]
    pub const fn throttle(&self) -> &AnnouncementThrottle {
        &self.throttle
    }

    #[must_use]
    pub const fn person_count(&self) -> usize {
        self.persons.confirmed()
    }
}

/// Pair each person with the first unclaimed object in their hand zone
fn find_held<'a>(
    config: &NarratorConfig,
    people: &[&'a Detection],
    others: &[&'a Detection],
) -> Vec<HeldObject<'a>> {
    let mut claimed: HashSet<usize> = HashSet::new();
    let mut held = Vec::new();

    for person in people {
        let found = others.iter().enumerate().find(|(i, object)| {
            !claimed.contains(i) && contains_center(&person.bounding_box, &object.bounding_box)
        });
        let Some((i, object)) = found else {
            continue;
        };
        claimed.insert(i);

        let label = object.label.to_lowercase();
        let threat = config.detection.threat_labels.contains(&label)
            || classify_aspect(&object.bounding_box, config.detection.elongation_threshold).elongated;
        held.push(HeldObject {
            person: *person,
            object: *object,
            threat,
        });
    }
    held
}

fn held_key(h: &HeldObject<'_>) -> AnnouncementKey {
    let kind = if h.threat { "threat" } else { "held" };
    format!("{kind}:{}", h.object.label.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{BoundingBox, FrameGeometry};

    fn coordinator() -> DetectionCoordinator {
        DetectionCoordinator::new(Arc::new(NarratorConfig::default()))
    }

    fn frame() -> Frame {
        Frame::blank(FrameGeometry {
            width: 640,
            height: 480,
        })
    }

    fn person_at(x: f64) -> Detection {
        Detection::new("person", 0.9, BoundingBox::new(x, 50.0, 100.0, 300.0))
    }

    #[test]
    fn test_stability_window_suppresses_flicker() {
        let window = Duration::from_millis(2000);
        let mut tracker = PersonCountTracker::default();
        let t0 = Instant::now();
        let at = |ms| t0 + Duration::from_millis(ms);

        assert_eq!(tracker.observe(0, at(0), window), None);
        assert_eq!(tracker.observe(1, at(500), window), None);
        assert_eq!(tracker.observe(2, at(1000), window), None);
        assert_eq!(tracker.observe(1, at(1500), window), None);
        assert_eq!(tracker.observe(1, at(3400), window), None);
        assert_eq!(tracker.observe(1, at(3500), window), Some(1));
        assert_eq!(tracker.observe(1, at(3600), window), None);
    }

    #[test]
    fn test_person_count_announced_once_after_window() {
        let mut c = coordinator();
        let t0 = Instant::now();
        let counts = [0usize, 1, 2, 1];
        let mut said = Vec::new();

        for (i, n) in counts.iter().enumerate() {
            let dets: Vec<Detection> = (0..*n).map(|k| person_at(k as f64 * 200.0)).collect();
            let plan = c.process_at(&frame(), &dets, NarrationMode::Quiet, t0 + Duration::from_millis(i as u64 * 500));
            said.extend(plan.announcements);
        }
        assert!(said.is_empty());

        // Hold one person for 2100ms in 100ms ticks
        let one = vec![person_at(0.0)];
        for step in 1..=21u64 {
            let plan = c.process_at(&frame(), &one, NarrationMode::Quiet, t0 + Duration::from_millis(1500 + step * 100));
            said.extend(plan.announcements);
        }
        assert_eq!(said.len(), 1);
        assert_eq!(said[0].text, "Veo una persona");
        assert_eq!(c.person_count(), 1);
    }

    #[test]
    fn test_knife_near_hand_is_urgent_threat() {
        let mut c = coordinator();
        let now = Instant::now();
        let knife = Detection::new("knife", 0.7, BoundingBox::new(150.0, 200.0, 20.0, 25.0));
        let dets = vec![knife.clone(), person_at(100.0)];

        let plan = c.process_at(&frame(), &dets, NarrationMode::Quiet, now);

        assert!(plan.has_alert());
        let alert = &plan.announcements[0];
        assert!(alert.urgent);
        assert_eq!(alert.key, "threat:knife");
        assert_eq!(alert.text, "Alerta: persona con cuchillo");

        let knife_box = plan.overlay.iter().find_map(|cmd| match cmd {
            OverlayCommand::Box { bounding_box, style, .. } if *bounding_box == knife.bounding_box => Some(*style),
            _ => None,
        });
        assert_eq!(knife_box, Some(OverlayStyle::Threat));

        let expires = c.throttle().expires_at("threat:knife").unwrap();
        assert_eq!(expires, now + Duration::from_millis(9000));
    }

    #[test]
    fn test_elongated_unknown_object_is_threat() {
        let mut c = coordinator();
        let stick = Detection::new("umbrella", 0.9, BoundingBox::new(150.0, 150.0, 10.0, 90.0));
        let plan = c.process_at(&frame(), &[person_at(100.0), stick], NarrationMode::Quiet, Instant::now());
        assert!(plan.has_alert());
        assert_eq!(plan.announcements[0].key, "threat:umbrella");
    }

    #[test]
    fn test_benign_held_object_not_urgent_and_not_sighting() {
        let mut c = coordinator();
        let cup = Detection::new("cup", 0.9, BoundingBox::new(150.0, 200.0, 20.0, 25.0));
        let plan = c.process_at(&frame(), &[person_at(100.0), cup], NarrationMode::Quiet, Instant::now());
        assert!(!plan.has_alert());
        let keys: Vec<&str> = plan.announcements.iter().map(|a| a.key.as_str()).collect();
        assert_eq!(keys, vec!["held:cup"]);
    }

    #[test]
    fn test_held_release_and_retrigger_guard() {
        let mut c = coordinator();
        let t0 = Instant::now();
        let at = |ms| t0 + Duration::from_millis(ms);
        let knife = Detection::new("knife", 0.9, BoundingBox::new(150.0, 200.0, 20.0, 25.0));
        let holding = vec![person_at(100.0), knife];
        let free = vec![person_at(100.0)];

        assert!(c.process_at(&frame(), &holding, NarrationMode::Quiet, at(0)).has_alert());
        assert!(!c.process_at(&frame(), &holding, NarrationMode::Quiet, at(100)).has_alert());

        // A short gap does not end the condition
        c.process_at(&frame(), &free, NarrationMode::Quiet, at(200));
        assert!(c.throttle().is_live_at("threat:knife", at(200)));

        // Hands free for the whole guard: the key is released
        c.process_at(&frame(), &free, NarrationMode::Quiet, at(1100));
        assert!(!c.throttle().is_live_at("threat:knife", at(1100)));

        // Back again, but not yet continuous for the guard
        assert!(!c.process_at(&frame(), &holding, NarrationMode::Quiet, at(1200)).has_alert());
        assert!(!c.process_at(&frame(), &holding, NarrationMode::Quiet, at(2100)).has_alert());
        assert!(c.process_at(&frame(), &holding, NarrationMode::Quiet, at(2200)).has_alert());
    }

    #[test]
    fn test_single_frame_dropout_keeps_alert_cooldown() {
        let mut c = coordinator();
        let t0 = Instant::now();
        let knife = Detection::new("knife", 0.9, BoundingBox::new(150.0, 200.0, 20.0, 25.0));
        let holding = vec![person_at(100.0), knife];
        let free = vec![person_at(100.0)];

        // 33ms frames for just under one alert cooldown; the knife drops out
        // for one frame every 45 frames
        let mut alerts = 0;
        for frame_no in 0..272u64 {
            let dets = if frame_no % 45 == 44 { &free } else { &holding };
            let plan = c.process_at(&frame(), dets, NarrationMode::Quiet, t0 + Duration::from_millis(frame_no * 33));
            alerts += plan.announcements.iter().filter(|a| a.urgent).count();
        }
        assert_eq!(alerts, 1);
    }

    #[test]
    fn test_sighting_throttled_and_thresholded() {
        let mut c = coordinator();
        let t0 = Instant::now();
        let cup = Detection::new("cup", 0.9, BoundingBox::new(400.0, 10.0, 30.0, 30.0));
        let faint = Detection::new("book", 0.66, BoundingBox::new(10.0, 10.0, 30.0, 30.0));
        let dets = vec![cup.clone(), cup, faint];

        let plan = c.process_at(&frame(), &dets, NarrationMode::Quiet, t0);
        assert_eq!(plan.announcements.len(), 1);
        assert_eq!(plan.announcements[0].text, "Veo: taza");
        assert_eq!(plan.labels, vec!["taza".to_string()]);
        // Clear + two cup boxes, book dropped
        assert_eq!(plan.overlay.len(), 3);

        let again = c.process_at(&frame(), &dets, NarrationMode::Quiet, t0 + Duration::from_millis(6999));
        assert!(again.announcements.is_empty());
        let later = c.process_at(&frame(), &dets, NarrationMode::Quiet, t0 + Duration::from_millis(7000));
        assert_eq!(later.announcements.len(), 1);
    }

    #[test]
    fn test_verbose_adds_distance_and_color() {
        let mut c = coordinator();
        let geometry = FrameGeometry {
            width: 640,
            height: 480,
        };
        let blue = Frame::solid(geometry, [10, 10, 200]);
        let cup = Detection::new("cup", 0.9, BoundingBox::new(400.0, 100.0, 40.0, 60.0));

        let plan = c.process_at(&blue, &[cup], NarrationMode::Verbose, Instant::now());
        assert_eq!(plan.announcements[0].text, "Veo: taza a 1.0 metros de color azul oscuro");
        let caption = plan.overlay.iter().find_map(|cmd| match cmd {
            OverlayCommand::Box { caption, .. } => Some(caption.clone()),
            OverlayCommand::Clear => None,
        });
        assert_eq!(caption.as_deref(), Some("TAZA 1.0 m AZUL OSCURO"));
    }

    #[test]
    fn test_reset_clears_state() {
        let mut c = coordinator();
        let cup = Detection::new("cup", 0.9, BoundingBox::new(400.0, 10.0, 30.0, 30.0));
        c.process_at(&frame(), &[cup], NarrationMode::Quiet, Instant::now());
        assert!(!c.throttle().is_empty());
        assert!(!c.current_labels().is_empty());

        c.reset();
        assert!(c.throttle().is_empty());
        assert!(c.current_labels().is_empty());
        assert_eq!(c.person_count(), 0);
    }
}
