use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::learning::LearningHints;
use crate::models::{
    common::Position,
    hazard::HazardField,
    nav_graph::NavGraph,
    traits::IAgent,
};

/// 既定のリスク許容度
pub const DEFAULT_RISK_TOLERANCE: f64 = 0.3;
/// 学習ヒントで引き上げられるリスク許容度の上限
pub const LEARNED_TOLERANCE_CAP: f64 = 0.5;
/// 致死的とみなす危険度
pub const DEFAULT_LETHAL_THRESHOLD: f64 = 0.8;
/// 1ステップあたりの被害係数（体力減少 = 危険度 × 係数）
pub const DAMAGE_FACTOR: f64 = 0.1;
/// 救助目標への到達判定半径（メートル、この値未満で到達）
pub const DEFAULT_RESCUE_RADIUS_M: f64 = 1.0;
/// 既知危険位置の近傍とみなす距離（メートル）
const KNOWN_DANGER_PROXIMITY_M: f64 = 2.0;

/// エージェントの行動フェーズ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentPhase {
    /// 経路計画中（初期状態）
    Planning,
    /// 経路に沿って移動中
    Moving,
    /// 危険を検知して経路を再計画中
    Replanning,
    /// 救助目標に到達
    Rescued,
    /// 行動不能
    Dead,
}

/// 行動不能になった原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeathCause {
    /// 経路が見つからず立ち往生
    NoRoute,
    /// 代替経路がなく、次の位置の危険度が致死的
    LethalDanger,
    /// 累積被害で体力が尽きた
    HealthDepleted,
}

/// `RescueAgent::step` の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// 行動を継続中
    Advanced,
    /// 救助目標に到達済み
    Rescued,
    /// 行動不能
    Died,
}

/// エージェントの状態（ミッション記録に含まれるスナップショット）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub agent_id: String,
    pub position: Position,
    /// 体力 [0, 1]
    pub health: f64,
    pub is_alive: bool,
    pub rescued: bool,
    /// 移動した各位置の危険度の累計
    pub cumulative_danger: f64,
    /// 訪問した位置の列（開始位置を含む）
    pub trajectory: Vec<Position>,
    /// 判断の記録（例: "avoided_danger_0.72"）
    pub decisions: Vec<String>,
    #[serde(default)]
    pub death_cause: Option<DeathCause>,
    /// 行動したシミュレーション時間の合計（秒）
    #[serde(default)]
    pub time_on_mission: f64,
}

impl AgentState {
    pub fn new(agent_id: String, start: Position) -> Self {
        Self {
            agent_id,
            position: start,
            health: 1.0,
            is_alive: true,
            rescued: false,
            cumulative_danger: 0.0,
            trajectory: vec![start],
            decisions: Vec::new(),
            death_cause: None,
            time_on_mission: 0.0,
        }
    }

    /// 移動1回あたりの平均危険度（移動していなければ0）
    pub fn mean_step_danger(&self) -> f64 {
        let steps = self.trajectory.len().saturating_sub(1);
        if steps == 0 {
            0.0
        } else {
            self.cumulative_danger / steps as f64
        }
    }
}

/// エージェントの行動パラメータ
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentConfig {
    pub risk_tolerance: f64,
    pub lethal_threshold: f64,
    pub rescue_radius: f64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            risk_tolerance: DEFAULT_RISK_TOLERANCE,
            lethal_threshold: DEFAULT_LETHAL_THRESHOLD,
            rescue_radius: DEFAULT_RESCUE_RADIUS_M,
        }
    }
}

/// 救助エージェント
///
/// 経路を保持し、1ティックに1ウェイポイントずつ進みます。次のウェイポイントの
/// 危険度がリスク許容度を超える場合は経路を再計画し、安全な代替がなく危険度が
/// 致死的であればその場で行動不能になります。状態の変更は自身の `AgentState` に限られます。
#[derive(Debug, Clone)]
pub struct RescueAgent {
    state: AgentState,
    phase: AgentPhase,
    target: Position,
    risk_tolerance: f64,
    lethal_threshold: f64,
    rescue_radius: f64,
    /// 現在位置を含まない残りのウェイポイント
    route: VecDeque<Position>,
    /// 全エージェントで共有する既知危険位置（不変）
    known_dangers: Arc<[Position]>,
}

impl RescueAgent {
    /// 新しい救助エージェントを作成
    ///
    /// # 引数
    ///
    /// * `id` - エージェントID
    /// * `start` - 開始位置（格子点）
    /// * `target` - 救助目標（格子点）
    /// * `config` - 行動パラメータ
    /// * `hints` - 過去のミッションから得た学習ヒント
    ///
    /// ヒントがある場合、リスク許容度はバイアス分だけ調整され、
    /// `max(0.5, 基本値)` を上限とします。
    pub fn new(
        id: impl Into<String>,
        start: Position,
        target: Position,
        config: &AgentConfig,
        hints: Option<&LearningHints>,
    ) -> Self {
        let (risk_tolerance, known_dangers) = match hints {
            Some(hints) => {
                let cap = LEARNED_TOLERANCE_CAP.max(config.risk_tolerance);
                (
                    (config.risk_tolerance + hints.risk_tolerance_bias).clamp(0.0, cap),
                    Arc::clone(&hints.avoid_positions),
                )
            }
            None => (config.risk_tolerance, Arc::from(Vec::new())),
        };

        Self {
            state: AgentState::new(id.into(), start),
            phase: AgentPhase::Planning,
            target,
            risk_tolerance,
            lethal_threshold: config.lethal_threshold,
            rescue_radius: config.rescue_radius,
            route: VecDeque::new(),
            known_dangers,
        }
    }

    pub fn state(&self) -> &AgentState {
        &self.state
    }

    pub fn phase(&self) -> AgentPhase {
        self.phase
    }

    pub fn target(&self) -> Position {
        self.target
    }

    pub fn risk_tolerance(&self) -> f64 {
        self.risk_tolerance
    }

    /// 残りのウェイポイント
    pub fn route(&self) -> impl Iterator<Item = &Position> {
        self.route.iter()
    }

    /// 訪問済みの位置列
    pub fn trajectory(&self) -> &[Position] {
        &self.state.trajectory
    }

    /// 状態スナップショットを取り出す（エージェントは破棄される）
    pub fn into_state(self) -> AgentState {
        self.state
    }

    /// 現在位置から救助目標までの危険回避経路を計画
    ///
    /// # 戻り値
    ///
    /// 経路が見つかった場合はtrue。見つからない場合もエージェントはその場に留まり、
    /// 次のティックで再試行します。
    pub fn plan_route(&mut self, graph: &NavGraph) -> bool {
        let Some(path) = graph.find_path(&self.state.position, &self.target, true) else {
            debug!("[{}] 経路なし: {} → {}", self.state.agent_id, self.state.position, self.target);
            self.route.clear();
            return false;
        };

        self.route = path.into_iter().skip(1).collect();

        let near_known = self
            .route
            .iter()
            .filter(|p| {
                self.known_dangers
                    .iter()
                    .any(|d| d.distance_to(p) < KNOWN_DANGER_PROXIMITY_M)
            })
            .count();
        if near_known > 0 {
            self.state
                .decisions
                .push(format!("route_near_known_danger_{}", near_known));
        }

        if self.phase == AgentPhase::Planning {
            self.phase = AgentPhase::Moving;
        }
        debug!("[{}] 経路計画: {}ウェイポイント", self.state.agent_id, self.route.len());
        true
    }

    /// 1ティック分の行動
    ///
    /// # 引数
    ///
    /// * `hazards` - 危険度フィールド（安全判定のみに使用）
    /// * `graph` - 危険度が同期済みのナビゲーショングラフ
    /// * `dt` - ティック幅（秒）
    pub fn step(&mut self, hazards: &HazardField, graph: &NavGraph, dt: f64) -> StepOutcome {
        if self.state.rescued {
            return StepOutcome::Rescued;
        }
        if !self.state.is_alive {
            return StepOutcome::Died;
        }
        self.state.time_on_mission += dt.max(0.0);

        if self.within_rescue_radius() {
            return self.mark_rescued();
        }

        if self.route.is_empty() && !self.plan_route(graph) {
            return self.die(DeathCause::NoRoute);
        }
        let Some(mut next) = self.route.front().copied() else {
            return self.die(DeathCause::NoRoute);
        };

        let (_, mut danger) = hazards.check_safety(&next);
        if danger > self.risk_tolerance {
            self.state.decisions.push(format!("avoided_danger_{:.2}", danger));
            self.phase = AgentPhase::Replanning;

            let previous = std::mem::take(&mut self.route);
            if self.plan_route(graph) {
                if let Some(candidate) = self.route.front().copied() {
                    self.state
                        .decisions
                        .push(format!("replanned_route_{}", self.route.len()));
                    next = candidate;
                    danger = hazards.check_safety(&next).1;
                }
            } else {
                self.route = previous;
            }

            if danger > self.risk_tolerance {
                // 安全な代替経路がない
                if danger >= self.lethal_threshold {
                    warn!(
                        "[{}] 致死的な危険度 {:.2} の位置 {} しか進路がありません",
                        self.state.agent_id, danger, next
                    );
                    return self.die(DeathCause::LethalDanger);
                }
                self.state.decisions.push(format!("forced_risk_{:.2}", danger));
            }
            self.phase = AgentPhase::Moving;
        }

        self.advance_to(next, danger);

        if self.state.health <= 0.0 {
            return self.die(DeathCause::HealthDepleted);
        }
        if self.within_rescue_radius() {
            return self.mark_rescued();
        }
        StepOutcome::Advanced
    }

    fn advance_to(&mut self, next: Position, danger: f64) {
        self.route.pop_front();
        self.state.position = next;
        self.state.trajectory.push(next);
        self.state.cumulative_danger += danger;
        self.state.health -= danger * DAMAGE_FACTOR;
    }

    fn within_rescue_radius(&self) -> bool {
        self.state.position.distance_to(&self.target) < self.rescue_radius
    }

    fn mark_rescued(&mut self) -> StepOutcome {
        self.state.rescued = true;
        self.phase = AgentPhase::Rescued;
        self.route.clear();
        info!(
            "[{}] 救助目標に到達: {} (体力 {:.2}, 累積危険度 {:.2})",
            self.state.agent_id, self.state.position, self.state.health, self.state.cumulative_danger
        );
        StepOutcome::Rescued
    }

    fn die(&mut self, cause: DeathCause) -> StepOutcome {
        self.state.is_alive = false;
        self.state.health = 0.0;
        self.state.death_cause = Some(cause);
        self.phase = AgentPhase::Dead;
        self.route.clear();
        info!("[{}] 行動不能 ({:?}) at {}", self.state.agent_id, cause, self.state.position);
        StepOutcome::Died
    }
}

impl IAgent for RescueAgent {
    fn get_id(&self) -> String {
        self.state.agent_id.clone()
    }

    fn is_active(&self) -> bool {
        self.state.is_alive && !self.state.rescued
    }

    fn get_position(&self) -> Position {
        self.state.position
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::hazard::{AttackerZone, FireSpreadParams, HazardSource};
    use crate::models::nav_graph::BuildingLayout;

    fn small_layout(grid_size: usize) -> BuildingLayout {
        BuildingLayout {
            floors: 1,
            grid_size,
            ..BuildingLayout::default()
        }
    }

    fn at(x: f64, y: f64) -> Position {
        Position::on_floor(x, y, 0, 3.0)
    }

    fn config(risk_tolerance: f64) -> AgentConfig {
        AgentConfig {
            risk_tolerance,
            ..AgentConfig::default()
        }
    }

    fn stationary_threat(center: Position, radius: f64, intensity: f64) -> HazardSource {
        let zone = AttackerZone::new(vec![center], 0.0, radius, intensity, 3.0).unwrap();
        HazardSource::Attacker(zone)
    }

    #[test]
    fn test_walks_to_target_without_hazards() {
        let layout = small_layout(5);
        let graph = NavGraph::from_layout(layout).unwrap();
        let hazards = HazardField::new(layout, FireSpreadParams::default(), 0);
        let mut agent = RescueAgent::new("a", at(0.0, 0.0), at(4.0, 0.0), &config(0.3), None);

        assert!(agent.plan_route(&graph));
        assert_eq!(agent.phase(), AgentPhase::Moving);

        let outcomes: Vec<StepOutcome> = (0..5).map(|_| agent.step(&hazards, &graph, 0.5)).collect();
        // 距離がちょうど1mでは到達とみなさない
        assert_eq!(
            outcomes,
            vec![
                StepOutcome::Advanced,
                StepOutcome::Advanced,
                StepOutcome::Advanced,
                StepOutcome::Rescued,
                StepOutcome::Rescued,
            ]
        );
        assert_eq!(agent.state().trajectory.len(), 5);
        assert_eq!(agent.trajectory()[0], at(0.0, 0.0));
        assert!(agent.state().rescued);
        assert!((agent.state().health - 1.0).abs() < 1e-9);
        // 到達後は状態が凍結される
        assert!((agent.state().time_on_mission - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_dies_without_moving_when_every_route_is_lethal() {
        let layout = small_layout(5);
        let mut graph = NavGraph::from_layout(layout).unwrap();
        let mut hazards = HazardField::new(layout, FireSpreadParams::default(), 0);
        hazards.add_source(stationary_threat(at(2.0, 2.0), 50.0, 0.95));
        hazards.sync_to_graph(&mut graph);

        let start = at(0.0, 0.0);
        let mut agent = RescueAgent::new("a", start, at(4.0, 4.0), &config(0.0), None);
        agent.plan_route(&graph);

        assert_eq!(agent.step(&hazards, &graph, 0.5), StepOutcome::Died);
        assert_eq!(agent.state().death_cause, Some(DeathCause::LethalDanger));
        assert_eq!(agent.state().trajectory, vec![start]);
        assert_eq!(agent.get_position(), start);
        assert!(agent.state().decisions[0].starts_with("avoided_danger_0.9"));
        assert_eq!(agent.state().health, 0.0);
        assert!(!agent.is_active());
    }

    #[test]
    fn test_failed_replan_keeps_previous_route() {
        let planning_graph = NavGraph::from_layout(small_layout(7)).unwrap();
        // 目標 (6, 0) を含まない狭いグラフでは再計画できない
        let narrow_graph = NavGraph::from_layout(small_layout(5)).unwrap();
        let mut hazards = HazardField::new(small_layout(7), FireSpreadParams::default(), 0);
        hazards.add_source(stationary_threat(at(1.0, 0.0), 0.5, 0.5));

        let mut agent = RescueAgent::new("a", at(0.0, 0.0), at(6.0, 0.0), &config(0.3), None);
        assert!(agent.plan_route(&planning_graph));
        let planned: Vec<Position> = agent.route().copied().collect();
        assert_eq!(planned.len(), 6);
        assert_eq!(planned[0], at(1.0, 0.0));

        assert_eq!(agent.step(&hazards, &narrow_graph, 0.5), StepOutcome::Advanced);
        let state = agent.state();
        assert_eq!(
            state.decisions,
            vec!["avoided_danger_0.50".to_string(), "forced_risk_0.50".to_string()]
        );
        assert_eq!(state.position, at(1.0, 0.0));
        assert!((state.cumulative_danger - 0.5).abs() < 1e-9);
        let remaining: Vec<Position> = agent.route().copied().collect();
        assert_eq!(remaining, planned[1..].to_vec());
        assert_eq!(agent.phase(), AgentPhase::Moving);
    }

    #[test]
    fn test_forced_risk_below_lethal_threshold() {
        let layout = small_layout(5);
        let mut graph = NavGraph::from_layout(layout).unwrap();
        let mut hazards = HazardField::new(layout, FireSpreadParams::default(), 0);
        hazards.add_source(stationary_threat(at(2.0, 2.0), 50.0, 0.5));
        hazards.sync_to_graph(&mut graph);

        let mut agent = RescueAgent::new("a", at(0.0, 0.0), at(4.0, 4.0), &config(0.1), None);
        agent.plan_route(&graph);
        assert_eq!(agent.step(&hazards, &graph, 0.5), StepOutcome::Advanced);

        let state = agent.state();
        assert_eq!(state.trajectory.len(), 2);
        assert!(state.decisions.iter().any(|d| d.starts_with("forced_risk_")));
        assert!(state.cumulative_danger > 0.4);
        assert!((state.health - (1.0 - state.cumulative_danger * DAMAGE_FACTOR)).abs() < 1e-9);
        assert_eq!(agent.phase(), AgentPhase::Moving);
    }

    #[test]
    fn test_replans_around_local_danger() {
        let layout = small_layout(7);
        let mut graph = NavGraph::from_layout(layout).unwrap();
        let hazards_empty = HazardField::new(layout, FireSpreadParams::default(), 0);
        let mut agent = RescueAgent::new("a", at(0.0, 3.0), at(6.0, 3.0), &config(0.3), None);
        agent.plan_route(&graph);
        agent.step(&hazards_empty, &graph, 0.5);
        assert_eq!(agent.get_position(), at(1.0, 3.0));

        // 直進ルート上に危険源が現れる
        let mut hazards = HazardField::new(layout, FireSpreadParams::default(), 0);
        hazards.add_source(stationary_threat(at(2.0, 3.0), 1.5, 0.9));
        hazards.sync_to_graph(&mut graph);

        assert_eq!(agent.step(&hazards, &graph, 0.5), StepOutcome::Advanced);
        let state = agent.state();
        assert!(state.decisions.iter().any(|d| d.starts_with("avoided_danger_")));
        assert!(state.decisions.iter().any(|d| d.starts_with("replanned_route_")));
        assert_ne!(state.position, at(2.0, 3.0));
        assert!(hazards.check_safety(&state.position).1 <= 0.3);
    }

    #[test]
    fn test_health_depletion_kills() {
        let layout = small_layout(5);
        let graph = NavGraph::from_layout(layout).unwrap();
        let mut hazards = HazardField::new(layout, FireSpreadParams::default(), 0);
        hazards.add_source(stationary_threat(at(2.0, 2.0), 50.0, 0.5));

        let mut agent = RescueAgent::new("a", at(0.0, 0.0), at(4.0, 4.0), &config(1.0), None);
        agent.state.health = 0.04;
        agent.plan_route(&graph);
        assert_eq!(agent.step(&hazards, &graph, 0.5), StepOutcome::Died);
        assert_eq!(agent.state().death_cause, Some(DeathCause::HealthDepleted));
        assert_eq!(agent.state().health, 0.0);
        assert_eq!(agent.state().trajectory.len(), 2);
    }

    #[test]
    fn test_no_route_is_fatal_in_step_only() {
        let layout = small_layout(5);
        let graph = NavGraph::from_layout(layout).unwrap();
        let hazards = HazardField::new(layout, FireSpreadParams::default(), 0);
        // 格子点でない目標には経路がない
        let mut agent = RescueAgent::new("a", at(0.0, 0.0), at(2.5, 2.5), &config(0.3), None);
        assert!(!agent.plan_route(&graph));
        assert!(agent.is_active());
        assert_eq!(agent.step(&hazards, &graph, 0.5), StepOutcome::Died);
        assert_eq!(agent.state().death_cause, Some(DeathCause::NoRoute));
        assert_eq!(agent.state().health, 0.0);
    }

    #[test]
    fn test_learning_hints_adjust_tolerance_and_flag_routes() {
        let layout = small_layout(5);
        let graph = NavGraph::from_layout(layout).unwrap();
        let hints = LearningHints {
            risk_tolerance_bias: 0.4,
            avoid_positions: Arc::from(vec![at(2.0, 0.0)]),
        };
        let mut agent = RescueAgent::new("a", at(0.0, 0.0), at(4.0, 0.0), &config(0.3), Some(&hints));
        assert!((agent.risk_tolerance() - LEARNED_TOLERANCE_CAP).abs() < 1e-9);

        agent.plan_route(&graph);
        assert!(agent
            .state()
            .decisions
            .iter()
            .any(|d| d.starts_with("route_near_known_danger_")));

        let negative = LearningHints {
            risk_tolerance_bias: -0.5,
            avoid_positions: Arc::from(Vec::new()),
        };
        let cautious = RescueAgent::new("b", at(0.0, 0.0), at(4.0, 0.0), &config(0.3), Some(&negative));
        assert_eq!(cautious.risk_tolerance(), 0.0);
    }
}
