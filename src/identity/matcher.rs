// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 跨摄像头身份匹配
//! Cross-camera identity matcher.
//!
//! 在注册表锁内线性扫描所有存活身份, 余弦距离最小且严格小于阈值者胜出;
//! 距离相同时取扫描中先遇到的那个. 没有合格身份时新建.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use super::event::LifecycleEvent;
use super::registry::IdentityRegistry;
use super::types::{Embedding, GlobalIdentity, RepresentativeMode};
use crate::error::{Error, Result};

/// 默认相似度阈值 (余弦距离, 越小越相似)
pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// 一次匹配的结果
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub global_id: Uuid,
    /// true 表示走了新建分支
    pub created: bool,
    /// 与被选中身份的距离 (新建时为 None)
    pub distance: Option<f32>,
    pub first_seen: DateTime<Utc>,
    /// 新建时在锁内生成的全局 appeared 事件
    pub appeared: Option<LifecycleEvent>,
}

#[derive(Debug, Clone)]
pub struct Matcher {
    registry: Arc<IdentityRegistry>,
    threshold: f32,
    mode: RepresentativeMode,
}

impl Matcher {
    pub fn new(registry: Arc<IdentityRegistry>) -> Self {
        Self {
            registry,
            threshold: DEFAULT_THRESHOLD,
            mode: RepresentativeMode::RunningMean,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_mode(mut self, mode: RepresentativeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn registry(&self) -> &Arc<IdentityRegistry> {
        &self.registry
    }

    pub fn match_and_update(
        &self,
        source_id: &str,
        camera_id: &str,
        embedding: &Embedding,
    ) -> Result<MatchOutcome> {
        self.match_and_update_at(source_id, camera_id, embedding, Utc::now())
    }

    pub fn match_and_update_at(
        &self,
        source_id: &str,
        camera_id: &str,
        embedding: &Embedding,
        now: DateTime<Utc>,
    ) -> Result<MatchOutcome> {
        if source_id.is_empty() {
            return Err(Error::EmptyIdentifier("source_id"));
        }
        if camera_id.is_empty() {
            return Err(Error::EmptyIdentifier("camera_id"));
        }
        embedding.validate()?;

        // 扫描-决策-修改 全程持锁
        let mut state = self.registry.lock();
        if state.is_closed() {
            return Err(Error::RegistryClosed);
        }
        if let Some(expected) = state.dimension() {
            if expected != embedding.len() {
                return Err(Error::DimensionMismatch {
                    expected,
                    actual: embedding.len(),
                });
            }
        }

        let mut best: Option<(usize, f32)> = None;
        for (index, identity) in state.identities().iter().enumerate() {
            let distance = identity.representative().cosine_distance(embedding);
            // 严格小于: 距离相同保留先遇到的
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((index, distance));
            }
        }

        if let Some((index, distance)) = best.filter(|&(_, d)| d < self.threshold) {
            if let Some(identity) = state.identity_mut(index) {
                identity.absorb(camera_id, embedding, now, self.mode);
                debug!(
                    global_id = %identity.global_id(),
                    camera_id,
                    distance,
                    cameras = identity.cameras_seen().len(),
                    "matched global identity"
                );
                return Ok(MatchOutcome {
                    global_id: identity.global_id(),
                    created: false,
                    distance: Some(distance),
                    first_seen: identity.first_seen(),
                    appeared: None,
                });
            }
        }

        let identity = GlobalIdentity::create(source_id, camera_id, embedding.clone(), now, self.mode);
        let outcome = MatchOutcome {
            global_id: identity.global_id(),
            created: true,
            distance: None,
            first_seen: identity.first_seen(),
            appeared: Some(LifecycleEvent::identity_appeared(&identity)),
        };
        debug!(
            global_id = %outcome.global_id,
            camera_id,
            closest = best.map(|(_, d)| d),
            "created global identity"
        );
        state.insert(identity);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Action, EventScope};
    use chrono::Duration;
    use rand::Rng;
    use std::collections::HashSet;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::from_vec(values.to_vec())
    }

    fn matcher() -> Matcher {
        Matcher::new(Arc::new(IdentityRegistry::new()))
    }

    #[test]
    fn test_scenario_a_close_embedding_matches() {
        let matcher = matcher();
        let x = matcher
            .match_and_update("src", "cam1", &emb(&[1.0, 0.0, 0.0]))
            .unwrap();
        assert!(x.created);

        let m = matcher
            .match_and_update("src", "cam2", &emb(&[0.95, 0.1, 0.0]))
            .unwrap();
        assert!(!m.created);
        assert_eq!(m.global_id, x.global_id);
        let d = m.distance.unwrap();
        assert!(d < 0.01, "distance was {d}");

        let identity = matcher.registry().get(x.global_id).unwrap();
        assert_eq!(identity.cameras_seen().len(), 2);
        let rep = identity.representative().data().to_vec();
        assert!((rep[0] - 0.975).abs() < 1e-6);
        assert!((rep[1] - 0.05).abs() < 1e-6);
        assert_eq!(rep[2], 0.0);
        assert_eq!(matcher.registry().len(), 1);
    }

    #[test]
    fn test_scenario_b_orthogonal_embedding_creates() {
        let matcher = matcher();
        let x = matcher
            .match_and_update("src", "cam1", &emb(&[1.0, 0.0, 0.0]))
            .unwrap();
        let y = matcher
            .match_and_update("src", "cam1", &emb(&[0.0, 1.0, 0.0]))
            .unwrap();
        assert!(y.created);
        assert_ne!(x.global_id, y.global_id);
        assert_eq!(matcher.registry().len(), 2);

        let identity = matcher.registry().get(y.global_id).unwrap();
        assert_eq!(
            identity.cameras_seen().iter().cloned().collect::<Vec<_>>(),
            vec!["cam1".to_string()]
        );
    }

    #[test]
    fn test_appeared_event_reflects_creation() {
        let matcher = matcher();
        let t0 = Utc::now();
        let x = matcher
            .match_and_update_at("src", "cam1", &emb(&[1.0, 0.0, 0.0]), t0)
            .unwrap();
        // 事件发送前另一路摄像头已匹配到同一身份
        let m = matcher
            .match_and_update_at("src", "cam2", &emb(&[0.99, 0.05, 0.0]), t0 + Duration::seconds(3))
            .unwrap();
        assert_eq!(m.global_id, x.global_id);
        assert!(m.appeared.is_none());

        let appeared = x.appeared.unwrap();
        assert_eq!(appeared.global_id, x.global_id);
        assert_eq!(appeared.scope, EventScope::Global);
        assert_eq!(appeared.action, Action::Appeared);
        assert_eq!(appeared.camera_id, "cam1");
        assert_eq!(appeared.start_time, t0);
        assert_eq!(appeared.end_time, t0);

        // 身份被移除后, 创建时的事件仍然可用
        matcher.registry().shutdown();
        assert!(matcher.registry().get(x.global_id).is_none());
    }

    #[test]
    fn test_threshold_is_strict() {
        // 正交向量距离正好是 1.0, 阈值 1.0 时不算匹配
        let matcher = matcher().with_threshold(1.0);
        matcher.match_and_update("src", "cam1", &emb(&[1.0, 0.0])).unwrap();
        let second = matcher.match_and_update("src", "cam1", &emb(&[0.0, 1.0])).unwrap();
        assert!(second.created);
    }

    #[test]
    fn test_picks_closest_identity() {
        let matcher = matcher().with_threshold(0.9);
        let a = matcher.match_and_update("src", "cam1", &emb(&[1.0, 0.0])).unwrap();
        let b = matcher.match_and_update("src", "cam1", &emb(&[0.0, 1.0])).unwrap();
        assert!(b.created);

        let m = matcher.match_and_update("src", "cam2", &emb(&[0.2, 1.0])).unwrap();
        assert_eq!(m.global_id, b.global_id);
        assert_ne!(m.global_id, a.global_id);
    }

    #[test]
    fn test_tie_goes_to_first_created() {
        let matcher = matcher().with_threshold(1.5);
        let a = matcher.match_and_update("src", "cam1", &emb(&[1.0, 0.0])).unwrap();
        // 阈值 1.5 下 [0,1] 会匹配 a, 直接往注册表里放第二个身份
        {
            let mut state = matcher.registry().lock();
            state.insert(GlobalIdentity::create(
                "src",
                "cam2",
                emb(&[0.0, 1.0]),
                Utc::now(),
                RepresentativeMode::RunningMean,
            ));
        }
        // [1,1] 与两者距离相同
        let m = matcher.match_and_update("src", "cam3", &emb(&[1.0, 1.0])).unwrap();
        assert_eq!(m.global_id, a.global_id);
    }

    #[test]
    fn test_dimension_mismatch_is_rejected() {
        let matcher = matcher();
        matcher.match_and_update("src", "cam1", &emb(&[1.0, 0.0, 0.0])).unwrap();
        let err = matcher
            .match_and_update("src", "cam1", &emb(&[1.0, 0.0]))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
        assert_eq!(matcher.registry().len(), 1);
    }

    #[test]
    fn test_rejects_bad_input() {
        let matcher = matcher();
        assert!(matches!(
            matcher.match_and_update("", "cam1", &emb(&[1.0])),
            Err(Error::EmptyIdentifier("source_id"))
        ));
        assert!(matches!(
            matcher.match_and_update("src", "", &emb(&[1.0])),
            Err(Error::EmptyIdentifier("camera_id"))
        ));
        assert!(matches!(
            matcher.match_and_update("src", "cam1", &emb(&[])),
            Err(Error::EmptyEmbedding)
        ));
        assert!(matcher.registry().is_empty());
    }

    #[test]
    fn test_closed_registry_rejects() {
        let matcher = matcher();
        matcher.registry().shutdown();
        assert!(matches!(
            matcher.match_and_update("src", "cam1", &emb(&[1.0])),
            Err(Error::RegistryClosed)
        ));
    }

    #[test]
    fn test_last_seen_is_monotonic() {
        let matcher = matcher();
        let t0 = Utc::now();
        let e = emb(&[1.0, 0.0]);
        let x = matcher.match_and_update_at("src", "cam1", &e, t0).unwrap();

        let mut previous = t0;
        for offset in [5, 2, 9, 1, 9, 12] {
            matcher
                .match_and_update_at("src", "cam1", &e, t0 + Duration::seconds(offset))
                .unwrap();
            let last_seen = matcher.registry().get(x.global_id).unwrap().last_seen();
            assert!(last_seen >= previous);
            previous = last_seen;
        }
        assert_eq!(previous, t0 + Duration::seconds(12));
    }

    #[test]
    fn test_concurrent_similar_calls_create_one_identity() {
        let matcher = matcher();
        let base = [0.3_f32, 0.8, 0.1, 0.5];
        let ids: Vec<Uuid> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..16)
                .map(|worker| {
                    let matcher = &matcher;
                    s.spawn(move || {
                        let mut rng = rand::thread_rng();
                        let camera = format!("cam{}", worker % 4);
                        (0..50)
                            .map(|_| {
                                let jittered: Vec<f32> =
                                    base.iter().map(|v| *v + rng.gen_range(-0.02_f32..0.02)).collect();
                                matcher
                                    .match_and_update("src", &camera, &Embedding::from_vec(jittered))
                                    .unwrap()
                                    .global_id
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });

        let unique: HashSet<Uuid> = ids.iter().copied().collect();
        assert_eq!(unique.len(), 1);
        assert_eq!(ids.len(), 16 * 50);
        assert_eq!(matcher.registry().len(), 1);
        let identity = matcher.registry().snapshot().remove(0);
        assert_eq!(identity.cameras_seen().len(), 4);
        assert_eq!(identity.observations(), 16 * 50);
    }

    #[test]
    fn test_concurrent_distinct_people_stay_distinct() {
        let matcher = matcher();
        let people = [
            [1.0_f32, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ];
        std::thread::scope(|s| {
            for (camera, _) in people.iter().enumerate() {
                let matcher = &matcher;
                let people = &people;
                s.spawn(move || {
                    for round in 0..40 {
                        let person = people[(camera + round) % people.len()];
                        matcher
                            .match_and_update("src", &format!("cam{camera}"), &Embedding::from_vec(person.to_vec()))
                            .unwrap();
                    }
                });
            }
        });
        assert_eq!(matcher.registry().len(), 4);
    }
}
