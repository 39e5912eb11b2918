//! Per-tick violation rules.
//!
//! Pure and synchronous: given the monotonic time of a tick and what the models saw,
//! decide which violations fire. All throttling state lives in
//! [`ViolationCounterState`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use exam_core::ProctorSettings;
use exam_core::model::{ViolationCategory, ViolationEvent, ViolationSnapshot};

use super::capability::{FaceDetection, ObjectDetection};

/// Labels that count as a phone, matched case-insensitively as substrings.
const PHONE_LABELS: [&str; 3] = ["phone", "mobile", "cell"];

/// Model output for one detection tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameAnalysis {
    pub faces: Vec<FaceDetection>,
    pub objects: Vec<ObjectDetection>,
}

/// What one tick produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutcome {
    pub events: Vec<ViolationEvent>,
    pub snapshot: ViolationSnapshot,
}

/// Throttling memory for the rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViolationCounterState {
    last_emitted_ms: HashMap<ViolationCategory, u64>,
    no_face_since_ms: Option<u64>,
}

impl ViolationCounterState {
    #[must_use]
    pub fn last_emitted_ms(&self, category: ViolationCategory) -> Option<u64> {
        self.last_emitted_ms.get(&category).copied()
    }

    #[must_use]
    pub fn no_face_since_ms(&self) -> Option<u64> {
        self.no_face_since_ms
    }

    fn cooled_down(&self, category: ViolationCategory, now_ms: u64, cooldown_ms: u64) -> bool {
        self.last_emitted_ms(category)
            .is_none_or(|last| now_ms.saturating_sub(last) >= cooldown_ms)
    }

    fn record(&mut self, category: ViolationCategory, now_ms: u64) {
        self.last_emitted_ms.insert(category, now_ms);
    }

    pub fn reset(&mut self) {
        self.last_emitted_ms.clear();
        self.no_face_since_ms = None;
    }
}

#[derive(Debug, Clone)]
pub struct ViolationRules {
    cooldown_ms: u64,
    no_face_threshold_ms: u64,
    object_confidence: f32,
    gaze_threshold: f32,
    state: ViolationCounterState,
}

impl ViolationRules {
    #[must_use]
    pub fn new(settings: &ProctorSettings) -> Self {
        Self {
            cooldown_ms: settings.cooldown_ms(),
            no_face_threshold_ms: settings.no_face_threshold_ms(),
            object_confidence: settings.object_confidence_threshold(),
            gaze_threshold: settings.gaze_down_threshold(),
            state: ViolationCounterState::default(),
        }
    }

    #[must_use]
    pub fn state(&self) -> &ViolationCounterState {
        &self.state
    }

    pub fn reset(&mut self) {
        self.state.reset();
    }

    /// Apply every rule to one tick's analysis.
    ///
    /// `now_ms` is monotonic time since detection started; `observed_at` is only
    /// stamped onto emitted events.
    pub fn evaluate(
        &mut self,
        now_ms: u64,
        observed_at: DateTime<Utc>,
        analysis: &FrameAnalysis,
    ) -> RuleOutcome {
        let mut events = Vec::new();
        let face_count = u32::try_from(analysis.faces.len()).unwrap_or(u32::MAX);

        if face_count > 1 && self.fire(ViolationCategory::MultipleFaces, now_ms) {
            events.push(ViolationEvent::multiple_faces(face_count, observed_at));
        }

        if face_count == 0 {
            let since = *self.state.no_face_since_ms.get_or_insert(now_ms);
            let absent_ms = now_ms.saturating_sub(since);
            if absent_ms >= self.no_face_threshold_ms
                && self.fire(ViolationCategory::NoFace, now_ms)
            {
                events.push(ViolationEvent::no_face(absent_ms, observed_at));
                // Restart the absence window so a long absence re-reports per window.
                self.state.no_face_since_ms = Some(now_ms);
            }
        } else {
            self.state.no_face_since_ms = None;
        }

        let looking_down = match analysis.faces.as_slice() {
            [face] => face
                .keypoints
                .is_some_and(|keypoints| keypoints.nose_drop() > self.gaze_threshold),
            _ => false,
        };
        if looking_down && self.fire(ViolationCategory::GazeDown, now_ms) {
            events.push(ViolationEvent::gaze_down(observed_at));
        }

        let phone = self.strongest_phone(&analysis.objects);
        if let Some(phone) = phone {
            if self.fire(ViolationCategory::ProhibitedObject, now_ms) {
                events.push(ViolationEvent::prohibited_object(
                    phone.label.clone(),
                    phone.confidence,
                    observed_at,
                ));
            }
        }

        RuleOutcome {
            events,
            snapshot: ViolationSnapshot {
                multiple_faces: face_count > 1,
                no_face: face_count == 0,
                phone_detected: phone.is_some(),
            },
        }
    }

    /// Returns whether `category` may fire now, recording the emission if so.
    fn fire(&mut self, category: ViolationCategory, now_ms: u64) -> bool {
        if self.state.cooled_down(category, now_ms, self.cooldown_ms) {
            self.state.record(category, now_ms);
            true
        } else {
            false
        }
    }

    fn strongest_phone<'a>(&self, objects: &'a [ObjectDetection]) -> Option<&'a ObjectDetection> {
        objects
            .iter()
            .filter(|object| object.confidence > self.object_confidence && is_phone(&object.label))
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
    }
}

fn is_phone(label: &str) -> bool {
    let label = label.to_lowercase();
    PHONE_LABELS.iter().any(|needle| label.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::capability::{FaceKeypoints, Point};
    use exam_core::model::Severity;
    use exam_core::time::fixed_now;
    use proptest::prelude::*;

    fn rules() -> ViolationRules {
        ViolationRules::new(&ProctorSettings::default())
    }

    fn face(nose_y: f32) -> FaceDetection {
        FaceDetection {
            score: 0.9,
            keypoints: Some(FaceKeypoints {
                right_eye: Point::new(0.4, 0.40),
                left_eye: Point::new(0.6, 0.40),
                nose_tip: Point::new(0.5, nose_y),
            }),
        }
    }

    fn faces(count: usize) -> FrameAnalysis {
        FrameAnalysis {
            faces: vec![face(0.42); count],
            objects: Vec::new(),
        }
    }

    fn object(label: &str, confidence: f32) -> FrameAnalysis {
        FrameAnalysis {
            faces: vec![face(0.42)],
            objects: vec![ObjectDetection {
                label: label.to_owned(),
                confidence,
            }],
        }
    }

    #[test]
    fn multiple_faces_respects_cooldown() {
        let mut rules = rules();
        let at = fixed_now();
        let emitted: Vec<usize> = [0, 2_000, 4_000]
            .into_iter()
            .map(|ms| rules.evaluate(ms, at, &faces(2)).events.len())
            .collect();
        assert_eq!(emitted, vec![1, 0, 0]);

        let later = rules.evaluate(5_000, at, &faces(2));
        assert_eq!(later.events.len(), 1);
        assert_eq!(later.events[0].detail().count, Some(2));
        assert_eq!(later.events[0].severity(), Severity::High);
        assert!(later.snapshot.multiple_faces);
    }

    #[test]
    fn no_face_needs_sustained_absence() {
        let mut rules = rules();
        let at = fixed_now();
        assert!(rules.evaluate(0, at, &faces(0)).events.is_empty());
        assert!(rules.evaluate(2_000, at, &faces(0)).events.is_empty());

        let fired = rules.evaluate(4_000, at, &faces(0));
        assert_eq!(fired.events.len(), 1);
        assert_eq!(fired.events[0].detail().duration_ms, Some(4_000));
        assert_eq!(rules.state().no_face_since_ms(), Some(4_000));
        assert!(fired.snapshot.no_face);
    }

    #[test]
    fn face_returning_clears_absence_start() {
        let mut rules = rules();
        let at = fixed_now();
        rules.evaluate(0, at, &faces(0));
        rules.evaluate(2_000, at, &faces(1));
        assert_eq!(rules.state().no_face_since_ms(), None);
        assert!(rules.evaluate(4_000, at, &faces(0)).events.is_empty());
    }

    #[test]
    fn long_absence_reports_once_per_window() {
        let mut rules = rules();
        let at = fixed_now();
        let fired: Vec<u64> = (0..=6)
            .map(|i| i * 2_000)
            .filter(|ms| !rules.evaluate(*ms, at, &faces(0)).events.is_empty())
            .collect();
        // Absence starts at 0 and restarts at each emission; cooldown also applies.
        assert_eq!(fired, vec![4_000, 10_000]);
    }

    #[test]
    fn phone_labels_match_case_insensitively_above_threshold() {
        let at = fixed_now();
        assert_eq!(rules().evaluate(0, at, &object("Cell Phone", 0.6)).events.len(), 1);
        assert_eq!(rules().evaluate(0, at, &object("MOBILE", 0.21)).events.len(), 1);
        assert!(rules().evaluate(0, at, &object("phone", 0.2)).events.is_empty());
        assert!(rules().evaluate(0, at, &object("book", 0.9)).events.is_empty());
    }

    #[test]
    fn strongest_phone_is_reported() {
        let mut analysis = object("cell phone", 0.3);
        analysis.objects.push(ObjectDetection {
            label: "mobile phone".into(),
            confidence: 0.8,
        });
        let outcome = rules().evaluate(0, fixed_now(), &analysis);
        assert_eq!(outcome.events[0].detail().label.as_deref(), Some("mobile phone"));
        assert!(outcome.snapshot.phone_detected);
    }

    #[test]
    fn gaze_down_needs_exactly_one_face_with_keypoints() {
        let at = fixed_now();
        let looking_down = FrameAnalysis {
            faces: vec![face(0.50)],
            objects: Vec::new(),
        };
        let outcome = rules().evaluate(0, at, &looking_down);
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].severity(), Severity::Medium);

        let level = FrameAnalysis {
            faces: vec![face(0.44)],
            objects: Vec::new(),
        };
        assert!(rules().evaluate(0, at, &level).events.is_empty());

        let two_down = FrameAnalysis {
            faces: vec![face(0.50), face(0.50)],
            objects: Vec::new(),
        };
        let outcome = rules().evaluate(0, at, &two_down);
        assert!(outcome
            .events
            .iter()
            .all(|event| event.category() != ViolationCategory::GazeDown));

        let no_keypoints = FrameAnalysis {
            faces: vec![FaceDetection {
                score: 0.9,
                keypoints: None,
            }],
            objects: Vec::new(),
        };
        assert!(rules().evaluate(0, at, &no_keypoints).events.is_empty());
    }

    #[test]
    fn reset_forgets_cooldowns() {
        let mut rules = rules();
        let at = fixed_now();
        rules.evaluate(0, at, &faces(2));
        rules.reset();
        assert_eq!(rules.state(), &ViolationCounterState::default());
        assert_eq!(rules.evaluate(1_000, at, &faces(2)).events.len(), 1);
    }

    #[test]
    fn gaze_and_phone_are_held_back_by_their_own_cooldowns() {
        let mut rules = rules();
        let at = fixed_now();
        let mut distracted = object("cell phone", 0.7);
        distracted.faces = vec![face(0.50)];

        let categories = |outcome: RuleOutcome| -> Vec<ViolationCategory> {
            outcome.events.iter().map(ViolationEvent::category).collect()
        };
        assert_eq!(
            categories(rules.evaluate(0, at, &distracted)),
            vec![ViolationCategory::GazeDown, ViolationCategory::ProhibitedObject]
        );
        assert!(rules.evaluate(2_000, at, &distracted).events.is_empty());
        assert!(rules.evaluate(4_999, at, &distracted).events.is_empty());
        assert_eq!(
            rules.state().last_emitted_ms(ViolationCategory::ProhibitedObject),
            Some(0)
        );
        assert_eq!(
            categories(rules.evaluate(5_000, at, &distracted)),
            vec![ViolationCategory::GazeDown, ViolationCategory::ProhibitedObject]
        );
    }

    fn scene(face_count: usize, looking_down: bool, phone: bool) -> FrameAnalysis {
        let nose_y = if looking_down { 0.50 } else { 0.42 };
        let objects = if phone {
            vec![ObjectDetection {
                label: "phone".into(),
                confidence: 0.9,
            }]
        } else {
            Vec::new()
        };
        FrameAnalysis {
            faces: vec![face(nose_y); face_count],
            objects,
        }
    }

    proptest! {
        #[test]
        fn emissions_of_a_category_are_never_closer_than_cooldown(
            gaps in proptest::collection::vec(1_u64..4_000, 1..60),
            scenes in proptest::collection::vec((0_usize..4, any::<bool>(), any::<bool>()), 60),
        ) {
            let settings = ProctorSettings::default();
            let cooldown = settings.cooldown_ms();
            let mut rules = ViolationRules::new(&settings);
            let mut now = 0_u64;
            let mut last: HashMap<ViolationCategory, u64> = HashMap::new();

            for (gap, (count, down, phone)) in gaps.iter().zip(scenes.iter()) {
                now += gap;
                let outcome = rules.evaluate(now, fixed_now(), &scene(*count, *down, *phone));
                for event in outcome.events {
                    if let Some(previous) = last.insert(event.category(), now) {
                        prop_assert!(now - previous >= cooldown);
                    }
                }
            }
        }
    }
}
