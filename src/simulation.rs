//! # Simulation モジュール
//!
//! 救助ミッションの時間駆動ループを管理する `MissionController` を提供します。
//!
//! 固定時間刻み（Δt）ごとに、以下の順序で処理が実行されます：
//!
//! 1. **危険源の更新**: 火災の成長・延焼、襲撃者の巡回
//! 2. **グラフ同期**: 危険源をナビゲーショングラフの危険度へ反映
//! 3. **エージェント処理**: 登録順に1体ずつ `step` を実行
//! 4. **終了判定**: 救助成功（最初の到達で即終了）、全滅、時間切れ
//!
//! ティック内で危険度が変化することはなく、同じシードからは同じ結果が得られます。
//!
//! ## 使用例
//!
//! ```no_run
//! use rescuesim::scenario::ScenarioConfig;
//! use rescuesim::simulation::MissionController;
//!
//! let config = ScenarioConfig::from_file("scenarios/fire_4story.yaml")?;
//! let controller = MissionController::from_scenario(&config, None, "mission_001", config.sim.seed, 1)?;
//! let mission = controller.run(config.sim.t_max_s, config.sim.dt_s);
//! println!("success: {}", mission.success);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, trace};

use crate::learning::LearningHints;
use crate::models::*;
use crate::scenario::{ScenarioConfig, ScenarioError};

/// 1ティックの処理結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    /// 継続
    Continue,
    /// いずれかのエージェントが救助目標に到達
    Succeeded,
    /// 全エージェントが行動不能
    AllDied,
}

pub struct MissionController {
    pub mission_id: String,
    pub scenario_name: String,
    pub current_time: f64,
    pub step_count: u64,
    pub verbose_level: u8,

    graph: NavGraph,
    hazards: HazardField,
    agents: Vec<RescueAgent>,
    started_at: DateTime<Utc>,
    planned: bool,
}

impl MissionController {
    pub fn new(
        mission_id: impl Into<String>,
        scenario_name: impl Into<String>,
        graph: NavGraph,
        hazards: HazardField,
        agents: Vec<RescueAgent>,
        verbose_level: u8,
    ) -> Self {
        Self {
            mission_id: mission_id.into(),
            scenario_name: scenario_name.into(),
            current_time: 0.0,
            step_count: 0,
            verbose_level,
            graph,
            hazards,
            agents,
            started_at: Utc::now(),
            planned: false,
        }
    }

    /// シナリオ設定からミッションを組み立てる
    ///
    /// グラフと危険度フィールドはミッションごとに新しく構築されます。
    /// 学習ヒントの既知危険位置は弱い危険源として追加し、最寄りのノードを
    /// 危険区画に分類し直します。
    ///
    /// # 引数
    ///
    /// * `config` - 検証済みのシナリオ設定
    /// * `hints` - 過去のミッションから得た学習ヒント
    /// * `mission_id` - ミッションID
    /// * `seed` - 危険源の乱数シード
    /// * `verbose_level` - ログの詳細度
    pub fn from_scenario(
        config: &ScenarioConfig,
        hints: Option<&LearningHints>,
        mission_id: impl Into<String>,
        seed: u64,
        verbose_level: u8,
    ) -> Result<Self, ScenarioError> {
        let mut graph = config.build_graph()?;
        let mut hazards = config.build_hazard_field(seed)?;

        if let Some(hints) = hints {
            hazards.add_soft_sources(&hints.avoid_positions);
            let marked = hints
                .avoid_positions
                .iter()
                .filter(|p| graph.mark_danger_zone(p))
                .count();
            if verbose_level > 0 && marked > 0 {
                info!("既知の危険位置 {}箇所を危険区画に設定", marked);
            }
        }

        let agent_config = config.agent_config();
        let start = config.start_position();
        let target = config.target_position();
        let agents = (0..config.agents.count)
            .map(|i| RescueAgent::new(format!("rescue_agent_{}", i), start, target, &agent_config, hints))
            .collect();

        Ok(Self::new(
            mission_id,
            config.meta.name.clone(),
            graph,
            hazards,
            agents,
            verbose_level,
        ))
    }

    pub fn graph(&self) -> &NavGraph {
        &self.graph
    }

    pub fn hazards(&self) -> &HazardField {
        &self.hazards
    }

    pub fn agents(&self) -> &[RescueAgent] {
        &self.agents
    }

    /// 初期経路の計画
    ///
    /// 現在の危険源をグラフに反映した上で、全エージェントが経路を計画します。
    /// 経路が見つからないエージェントは最初のティックで再試行します。
    pub fn coordinate_planning(&mut self) {
        self.hazards.sync_to_graph(&mut self.graph);

        for agent in &mut self.agents {
            let planned = agent.plan_route(&self.graph);
            if self.verbose_level > 1 {
                debug!(
                    "{}: 初期経路 {} ({}ウェイポイント)",
                    agent.get_id(),
                    if planned { "計画済み" } else { "なし" },
                    agent.route().count()
                );
            }
        }
        self.planned = true;
    }

    /// 1ティック進める
    ///
    /// 危険源を更新してグラフへ同期した後、行動中のエージェントを登録順に処理します。
    /// 救助に成功したエージェントが出た時点で残りのエージェントは処理しません。
    pub fn tick(&mut self, dt: f64) -> TickStatus {
        if !self.planned {
            self.coordinate_planning();
        }

        self.hazards.update(dt);
        self.hazards.sync_to_graph(&mut self.graph);

        self.current_time += dt;
        self.step_count += 1;

        for agent in &mut self.agents {
            if !agent.is_active() {
                continue;
            }
            if agent.step(&self.hazards, &self.graph, dt) == StepOutcome::Rescued {
                info!(
                    "{} が救助目標に到達 (時刻 {:.1}秒)",
                    agent.get_id(),
                    self.current_time
                );
                return TickStatus::Succeeded;
            }
        }

        if self.verbose_level > 2 {
            trace!(
                "時刻: {:.1}秒 (ステップ: {}, 危険源: {}, 行動中: {})",
                self.current_time,
                self.step_count,
                self.hazards.active_zones().len(),
                self.agents.iter().filter(|a| a.is_active()).count()
            );
        }

        if self.agents.iter().all(|a| !a.state().is_alive) {
            return TickStatus::AllDied;
        }
        TickStatus::Continue
    }

    /// ミッションを終了条件まで実行
    ///
    /// # 引数
    ///
    /// * `max_seconds` - シミュレーション時間の上限
    /// * `tick_seconds` - ティック幅
    pub fn run(self, max_seconds: f64, tick_seconds: f64) -> Mission {
        self.run_inner(max_seconds, tick_seconds, None)
    }

    /// 各ティックの後に描画側へ通知しながらミッションを実行
    pub fn run_with_observer(
        self,
        max_seconds: f64,
        tick_seconds: f64,
        observer: &mut dyn ITickObserver,
    ) -> Mission {
        self.run_inner(max_seconds, tick_seconds, Some(observer))
    }

    fn run_inner(
        mut self,
        max_seconds: f64,
        tick_seconds: f64,
        mut observer: Option<&mut dyn ITickObserver>,
    ) -> Mission {
        info!(
            "=== ミッション開始: {} ({}, エージェント{}名) ===",
            self.mission_id,
            self.scenario_name,
            self.agents.len()
        );
        self.started_at = Utc::now();

        if !self.planned {
            self.coordinate_planning();
        }

        let mut reason = Some(FailureReason::Timeout);
        while self.current_time < max_seconds {
            let status = self.tick(tick_seconds);

            if let Some(observer) = observer.as_deref_mut() {
                let states: Vec<&AgentState> = self.agents.iter().map(|a| a.state()).collect();
                observer.on_tick(self.current_time, self.hazards.active_zones(), &states);
            }

            if self.step_count % 20 == 0 && self.verbose_level > 0 {
                let progress = (self.current_time / max_seconds) * 100.0;
                info!("進行状況: {:.1}% ({:.1}/{:.1}秒)", progress, self.current_time, max_seconds);
            }

            match status {
                TickStatus::Continue => {}
                TickStatus::Succeeded => {
                    reason = None;
                    break;
                }
                TickStatus::AllDied => {
                    reason = Some(FailureReason::AllAgentsDied);
                    break;
                }
            }
        }

        self.finalize(reason)
    }

    fn finalize(self, reason: Option<FailureReason>) -> Mission {
        match reason {
            None => info!("=== ミッション成功: {:.1}秒 ===", self.current_time),
            Some(reason) => info!("=== ミッション失敗: {} ({:.1}秒) ===", reason, self.current_time),
        }

        let agents = self.agents.into_iter().map(RescueAgent::into_state).collect();
        Mission::finalize(
            self.mission_id,
            self.scenario_name,
            self.started_at,
            reason,
            self.current_time,
            agents,
        )
    }
}

/// 描画用のエージェント状態
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentFrame {
    pub agent_id: String,
    pub position: Position,
    pub health: f64,
    pub is_alive: bool,
    pub rescued: bool,
}

/// 1ティック分の描画用スナップショット
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickFrame {
    pub time: f64,
    pub zones: Vec<ZoneSnapshot>,
    pub agents: Vec<AgentFrame>,
}

/// 各ティックのスナップショットを記録する観測者
#[derive(Debug, Default)]
pub struct FrameRecorder {
    frames: Vec<TickFrame>,
}

impl FrameRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> &[TickFrame] {
        &self.frames
    }

    /// 記録したフレームをJSON Lines形式で書き出す
    pub fn write_jsonl<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        for frame in &self.frames {
            serde_json::to_writer(&mut writer, frame)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()
    }
}

impl ITickObserver for FrameRecorder {
    fn on_tick(&mut self, time: f64, zones: &[HazardSource], agents: &[&AgentState]) {
        self.frames.push(TickFrame {
            time,
            zones: zones.iter().map(ZoneSnapshot::from).collect(),
            agents: agents
                .iter()
                .map(|a| AgentFrame {
                    agent_id: a.agent_id.clone(),
                    position: a.position,
                    health: a.health,
                    is_alive: a.is_alive,
                    rescued: a.rescued,
                })
                .collect(),
        });
    }
}
