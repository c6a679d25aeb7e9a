//! # Learning モジュール
//!
//! 過去のミッション記録の保存・読み込みと、そこから次のミッションへ渡す
//! 学習ヒントおよび統計を算出します。
//!
//! シミュレーション中にこのモジュールへアクセスすることはありません。
//! 記録の読み込みはミッション開始前、書き込みは終了後に限られます。

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::models::{
    common::Position,
    mission::{FailureReason, Mission},
    rescue_agent::DEFAULT_RISK_TOLERANCE,
};

/// 学習ヒントとして保持する既知危険位置の最大数
pub const MAX_AVOID_POSITIONS: usize = 50;
/// 成功時の平均危険度に上乗せする余裕
const TOLERANCE_MARGIN: f64 = 0.1;

/// ミッション記録ストアのエラー
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("ミッション記録の入出力エラー: {0}")]
    Io(#[from] std::io::Error),
    #[error("ミッション記録の{line}行目を解析できません: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("ミッション記録をシリアライズできません: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// ミッション開始前に全エージェントへ渡す学習ヒント
///
/// 一度だけ算出され、ミッション中は変更されません。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LearningHints {
    /// リスク許容度への加算値
    pub risk_tolerance_bias: f64,
    /// 過去に行動不能になった位置
    pub avoid_positions: Arc<[Position]>,
}

impl LearningHints {
    /// ミッション履歴から学習ヒントを算出
    ///
    /// - バイアス: 成功ミッションで救助に成功したエージェントの1ステップあたり平均危険度
    ///   の平均に余裕0.1を加え、既定の許容度との差をとります（成功例がなければ0）。
    /// - 回避位置: 失敗ミッションで行動不能になったエージェントの最終位置のうち、
    ///   新しいものから最大50件。
    ///
    /// # 引数
    ///
    /// * `missions` - 古い順に並んだミッション記録
    pub fn from_history(missions: &[Mission]) -> Self {
        let successful_dangers: Vec<f64> = missions
            .iter()
            .filter(|m| m.success)
            .flat_map(|m| m.rescuers())
            .map(|a| a.mean_step_danger())
            .collect();

        let risk_tolerance_bias = if successful_dangers.is_empty() {
            0.0
        } else {
            let mean = successful_dangers.iter().sum::<f64>() / successful_dangers.len() as f64;
            mean + TOLERANCE_MARGIN - DEFAULT_RISK_TOLERANCE
        };

        let deaths: Vec<Position> = missions
            .iter()
            .filter(|m| !m.success)
            .flat_map(|m| m.casualties())
            .filter_map(|a| a.trajectory.last().copied())
            .collect();
        let keep_from = deaths.len().saturating_sub(MAX_AVOID_POSITIONS);
        let avoid_positions: Arc<[Position]> = Arc::from(&deaths[keep_from..]);

        debug!(
            "学習ヒント: バイアス {:.3}, 回避位置 {}件 (履歴{}件)",
            risk_tolerance_bias,
            avoid_positions.len(),
            missions.len()
        );

        Self {
            risk_tolerance_bias,
            avoid_positions,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.risk_tolerance_bias == 0.0 && self.avoid_positions.is_empty()
    }
}

/// ミッション記録の永続化インターフェース
pub trait IMissionStore {
    /// 終了したミッションを記録
    fn record(&mut self, mission: &Mission) -> Result<(), StoreError>;

    /// 記録を古い順に読み込む（シナリオ名を指定した場合はそのシナリオのみ）
    fn load(&self, scenario: Option<&str>) -> Result<Vec<Mission>, StoreError>;
}

/// メモリ上のミッション記録（プロセス終了で消える）
#[derive(Debug, Clone, Default)]
pub struct MemoryMissionStore {
    missions: Vec<Mission>,
}

impl MemoryMissionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IMissionStore for MemoryMissionStore {
    fn record(&mut self, mission: &Mission) -> Result<(), StoreError> {
        self.missions.push(mission.clone());
        Ok(())
    }

    fn load(&self, scenario: Option<&str>) -> Result<Vec<Mission>, StoreError> {
        Ok(self
            .missions
            .iter()
            .filter(|m| scenario.is_none_or(|s| m.scenario == s))
            .cloned()
            .collect())
    }
}

/// JSON Lines 形式のファイルに追記するミッション記録
#[derive(Debug, Clone)]
pub struct JsonlMissionStore {
    path: PathBuf,
}

impl JsonlMissionStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IMissionStore for JsonlMissionStore {
    fn record(&mut self, mission: &Mission) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(mission).map_err(StoreError::Serialize)?;
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", line)?;

        info!("ミッション記録を保存: {} → {}", mission.mission_id, self.path.display());
        Ok(())
    }

    fn load(&self, scenario: Option<&str>) -> Result<Vec<Mission>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path)?;
        let mut missions = Vec::new();
        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let mission: Mission = serde_json::from_str(line).map_err(|source| StoreError::Parse {
                line: index + 1,
                source,
            })?;
            if scenario.is_none_or(|s| mission.scenario == s) {
                missions.push(mission);
            }
        }
        Ok(missions)
    }
}

/// ミッション履歴の集計
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissionStatistics {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// 成功率（%）
    pub success_rate: f64,
    /// 成功ミッションの平均所要時間（秒）
    pub avg_success_time: Option<f64>,
    pub min_success_time: Option<f64>,
    pub max_success_time: Option<f64>,
    /// 失敗理由ごとの件数
    pub failure_reasons: BTreeMap<FailureReason, usize>,
    /// 累積危険度が最小の救助エージェントの軌跡
    pub best_trajectory: Option<Vec<Position>>,
    pub best_cumulative_danger: Option<f64>,
}

impl MissionStatistics {
    pub fn from_missions(missions: &[Mission]) -> Self {
        let total = missions.len();
        let success_times: Vec<f64> = missions
            .iter()
            .filter(|m| m.success)
            .map(|m| m.total_time)
            .collect();
        let successful = success_times.len();

        let mut failure_reasons = BTreeMap::new();
        for reason in missions.iter().filter_map(|m| m.reason_failed) {
            *failure_reasons.entry(reason).or_insert(0) += 1;
        }

        let best = missions
            .iter()
            .filter(|m| m.success)
            .flat_map(|m| m.rescuers())
            .min_by(|a, b| a.cumulative_danger.total_cmp(&b.cumulative_danger));

        Self {
            total,
            successful,
            failed: total - successful,
            success_rate: if total == 0 {
                0.0
            } else {
                successful as f64 / total as f64 * 100.0
            },
            avg_success_time: (successful > 0)
                .then(|| success_times.iter().sum::<f64>() / successful as f64),
            min_success_time: success_times.iter().copied().reduce(f64::min),
            max_success_time: success_times.iter().copied().reduce(f64::max),
            failure_reasons,
            best_trajectory: best.map(|a| a.trajectory.clone()),
            best_cumulative_danger: best.map(|a| a.cumulative_danger),
        }
    }

    /// 統計情報を表示
    pub fn print_summary(&self) {
        println!("=== ミッション統計 ===");
        println!("総ミッション数: {}", self.total);
        println!("成功: {} / 失敗: {}", self.successful, self.failed);
        println!("成功率: {:.1}%", self.success_rate);
        if let (Some(avg), Some(min), Some(max)) =
            (self.avg_success_time, self.min_success_time, self.max_success_time)
        {
            println!("成功時の所要時間: 平均 {:.1}秒 (最短 {:.1}秒, 最長 {:.1}秒)", avg, min, max);
        }
        for (reason, count) in &self.failure_reasons {
            println!("失敗理由 {}: {}件", reason, count);
        }
        if let (Some(trajectory), Some(danger)) = (&self.best_trajectory, self.best_cumulative_danger) {
            println!("最良の軌跡: {}ステップ, 累積危険度 {:.2}", trajectory.len(), danger);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::rescue_agent::{AgentState, DeathCause};
    use chrono::Utc;

    fn at(x: f64, y: f64) -> Position {
        Position::on_floor(x, y, 0, 3.0)
    }

    fn rescuer(id: &str, steps: usize, cumulative_danger: f64) -> AgentState {
        let mut state = AgentState::new(id.to_string(), at(0.0, 0.0));
        for i in 1..=steps {
            state.trajectory.push(at(i as f64, 0.0));
        }
        state.cumulative_danger = cumulative_danger;
        state.rescued = true;
        state
    }

    fn casualty(id: &str, x: f64) -> AgentState {
        let mut state = AgentState::new(id.to_string(), at(0.0, 0.0));
        state.trajectory.push(at(x, 0.0));
        state.is_alive = false;
        state.death_cause = Some(DeathCause::LethalDanger);
        state
    }

    fn mission(id: &str, scenario: &str, reason: Option<FailureReason>, time: f64, agents: Vec<AgentState>) -> Mission {
        Mission::finalize(id.to_string(), scenario.to_string(), Utc::now(), reason, time, agents)
    }

    #[test]
    fn test_hints_from_empty_history() {
        let hints = LearningHints::from_history(&[]);
        assert!(hints.is_empty());
    }

    #[test]
    fn test_hints_bias_from_successful_rescuers() {
        let history = vec![
            mission("m1", "s", None, 10.0, vec![rescuer("a", 4, 1.2)]),
            mission("m2", "s", None, 12.0, vec![rescuer("b", 2, 0.2), casualty("c", 3.0)]),
        ];
        let hints = LearningHints::from_history(&history);
        // (0.3 + 0.1) / 2 + 0.1 - 0.3
        assert!((hints.risk_tolerance_bias - 0.0).abs() < 1e-9);
        // 成功ミッション内の犠牲は回避位置にしない
        assert!(hints.avoid_positions.is_empty());
    }

    #[test]
    fn test_hints_keep_recent_death_positions() {
        let history: Vec<Mission> = (0..60)
            .map(|i| {
                mission(
                    &format!("m{}", i),
                    "s",
                    Some(FailureReason::AllAgentsDied),
                    1.0,
                    vec![casualty("a", i as f64)],
                )
            })
            .collect();
        let hints = LearningHints::from_history(&history);
        assert_eq!(hints.avoid_positions.len(), MAX_AVOID_POSITIONS);
        assert_eq!(hints.avoid_positions[0], at(10.0, 0.0));
        assert_eq!(hints.avoid_positions[49], at(59.0, 0.0));
        assert_eq!(hints.risk_tolerance_bias, 0.0);
    }

    #[test]
    fn test_memory_store_filters_by_scenario() {
        let mut store = MemoryMissionStore::new();
        store.record(&mission("m1", "fire", None, 1.0, vec![])).unwrap();
        store.record(&mission("m2", "attacker", Some(FailureReason::Timeout), 1.0, vec![])).unwrap();
        assert_eq!(store.load(None).unwrap().len(), 2);
        let fire = store.load(Some("fire")).unwrap();
        assert_eq!(fire.len(), 1);
        assert_eq!(fire[0].mission_id, "m1");
    }

    #[test]
    fn test_jsonl_store_appends_and_loads() {
        let path = std::env::temp_dir().join(format!(
            "rescuesim_store_test_{}_{}.jsonl",
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        let mut store = JsonlMissionStore::new(&path);
        assert!(store.load(None).unwrap().is_empty());

        let first = mission("m1", "fire", None, 8.5, vec![rescuer("a", 3, 0.3)]);
        let second = mission("m2", "fire", Some(FailureReason::AllAgentsDied), 2.0, vec![casualty("b", 1.0)]);
        store.record(&first).unwrap();
        store.record(&second).unwrap();

        let loaded = store.load(Some("fire")).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].mission_id, "m1");
        assert_eq!(loaded[0].agents[0].trajectory, first.agents[0].trajectory);
        assert_eq!(loaded[1].reason_failed, Some(FailureReason::AllAgentsDied));
        assert_eq!(loaded[1].agents[0].death_cause, Some(DeathCause::LethalDanger));
        assert!(store.load(Some("attacker")).unwrap().is_empty());

        fs::write(&path, "{not json}\n").unwrap();
        assert!(matches!(store.load(None), Err(StoreError::Parse { line: 1, .. })));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_statistics() {
        let history = vec![
            mission("m1", "s", None, 10.0, vec![rescuer("a", 4, 1.2)]),
            mission("m2", "s", Some(FailureReason::Timeout), 300.0, vec![]),
            mission("m3", "s", None, 20.0, vec![rescuer("b", 2, 0.2)]),
            mission("m4", "s", Some(FailureReason::AllAgentsDied), 3.0, vec![casualty("c", 1.0)]),
        ];
        let stats = MissionStatistics::from_missions(&history);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.successful, 2);
        assert_eq!(stats.failed, 2);
        assert!((stats.success_rate - 50.0).abs() < 1e-9);
        assert_eq!(stats.avg_success_time, Some(15.0));
        assert_eq!(stats.min_success_time, Some(10.0));
        assert_eq!(stats.max_success_time, Some(20.0));
        assert_eq!(stats.failure_reasons.get(&FailureReason::Timeout), Some(&1));
        assert_eq!(stats.best_cumulative_danger, Some(0.2));
        assert_eq!(stats.best_trajectory.map(|t| t.len()), Some(3));

        let empty = MissionStatistics::from_missions(&[]);
        assert_eq!(empty.success_rate, 0.0);
        assert_eq!(empty.avg_success_time, None);
    }
}
