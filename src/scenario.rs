use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::models::{
    common::Position,
    hazard::{
        AttackerZone, FireIncidenceHint, FireSpreadParams, HazardField, HazardKind, HazardSource,
        ATTACKER_INTENSITY, ATTACKER_RADIUS_M, ATTACKER_SPEED_MPS, FIRE_INITIAL_INTENSITY,
        FIRE_INITIAL_RADIUS_M,
    },
    nav_graph::{BuildingLayout, NavGraph, NavGraphError},
    rescue_agent::{AgentConfig, DEFAULT_LETHAL_THRESHOLD, DEFAULT_RESCUE_RADIUS_M, DEFAULT_RISK_TOLERANCE},
};

/// シナリオメタデータ
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioMeta {
    pub version: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// シミュレーション設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationConfig {
    pub dt_s: f64,
    pub t_max_s: f64,
    pub seed: u64,
}

/// 建物設定
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BuildingConfig {
    pub floors: u32,
    pub floor_height_m: f64,
    pub grid_size: usize,
    pub cell_size_m: f64,
}

impl Default for BuildingConfig {
    fn default() -> Self {
        let layout = BuildingLayout::default();
        Self {
            floors: layout.floors,
            floor_height_m: layout.floor_height,
            grid_size: layout.grid_size,
            cell_size_m: layout.cell_size,
        }
    }
}

/// 階番号付きの床面上の点（z は階番号 × 階高）
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct FloorPoint {
    pub x_m: f64,
    pub y_m: f64,
    pub floor: u32,
}

impl FloorPoint {
    pub fn to_position(&self, floor_height: f64) -> Position {
        Position::on_floor(self.x_m, self.y_m, self.floor, floor_height)
    }
}

/// 救助ミッション設定
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MissionConfig {
    /// エージェントの開始位置
    pub start: FloorPoint,
    /// 救助目標
    pub target: FloorPoint,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            start: FloorPoint { x_m: 2.0, y_m: 2.0, floor: 0 },
            target: FloorPoint { x_m: 15.0, y_m: 15.0, floor: 3 },
        }
    }
}

/// 救助エージェント設定
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentsConfig {
    pub count: u32,
    pub risk_tolerance: f64,
    pub lethal_threshold: f64,
    pub rescue_radius_m: f64,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            count: 3,
            risk_tolerance: DEFAULT_RISK_TOLERANCE,
            lethal_threshold: DEFAULT_LETHAL_THRESHOLD,
            rescue_radius_m: DEFAULT_RESCUE_RADIUS_M,
        }
    }
}

/// 初期火災ゾーンの明示指定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FireZoneConfig {
    pub center: FloorPoint,
    #[serde(default = "default_fire_intensity")]
    pub intensity: f64,
    #[serde(default = "default_fire_radius")]
    pub radius_m: f64,
}

fn default_fire_intensity() -> f64 {
    FIRE_INITIAL_INTENSITY
}

fn default_fire_radius() -> f64 {
    FIRE_INITIAL_RADIUS_M
}

/// 火災設定
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FireConfig {
    pub spread: FireSpreadParams,
    /// 空の場合は映像解析ヒントまたはランダム配置
    pub initial_zones: Vec<FireZoneConfig>,
}

/// 襲撃者設定
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AttackerConfig {
    /// 省略時は上位2階を周回する既定の巡回経路
    pub patrol: Option<Vec<FloorPoint>>,
    pub speed_mps: f64,
    pub radius_m: f64,
    pub intensity: f64,
}

impl Default for AttackerConfig {
    fn default() -> Self {
        Self {
            patrol: None,
            speed_mps: ATTACKER_SPEED_MPS,
            radius_m: ATTACKER_RADIUS_M,
            intensity: ATTACKER_INTENSITY,
        }
    }
}

/// 危険源設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HazardConfig {
    pub kind: HazardKind,
    #[serde(default)]
    pub fire: FireConfig,
    #[serde(default)]
    pub attacker: AttackerConfig,
}

/// 完全なシナリオ設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioConfig {
    pub meta: ScenarioMeta,
    pub sim: SimulationConfig,
    #[serde(default)]
    pub building: BuildingConfig,
    #[serde(default)]
    pub mission: MissionConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
    pub hazard: HazardConfig,
    /// 映像解析による火災発生ヒント
    #[serde(default)]
    pub fire_hints: Vec<FireIncidenceHint>,
}

impl FromStr for ScenarioConfig {
    type Err = ScenarioError;

    /// YAML文字列からシナリオ設定を読み込み、検証する
    fn from_str(contents: &str) -> Result<Self, Self::Err> {
        let config: ScenarioConfig = serde_yaml::from_str(contents)
            .map_err(|e| ScenarioError::ParseError(PathBuf::from("<inline>"), e))?;
        config.validate()?;
        Ok(config)
    }
}

impl ScenarioConfig {
    /// YAMLファイルからシナリオ設定を読み込み
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ScenarioError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ScenarioError::FileNotFound(path.to_path_buf()));
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| ScenarioError::IoError(path.to_path_buf(), e))?;

        let config: ScenarioConfig = serde_yaml::from_str(&contents)
            .map_err(|e| ScenarioError::ParseError(path.to_path_buf(), e))?;

        config.validate()?;

        Ok(config)
    }

    /// 設定の検証
    pub fn validate(&self) -> Result<(), ScenarioError> {
        if !(self.sim.dt_s.is_finite() && self.sim.dt_s > 0.0) {
            return Err(ScenarioError::ValidationError("dt_s must be positive and finite".to_string()));
        }
        if !(self.sim.t_max_s.is_finite() && self.sim.t_max_s > 0.0) {
            return Err(ScenarioError::ValidationError("t_max_s must be positive and finite".to_string()));
        }

        let layout = self.layout();
        layout.validate()?;

        for (label, point) in [("start", &self.mission.start), ("target", &self.mission.target)] {
            if layout.grid_coords(&point.to_position(layout.floor_height)).is_none() {
                return Err(ScenarioError::ValidationError(format!(
                    "mission {} ({}, {}, floor {}) is not a grid point of the building",
                    label, point.x_m, point.y_m, point.floor
                )));
            }
        }

        if self.agents.count == 0 {
            return Err(ScenarioError::ValidationError("agents.count must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.agents.risk_tolerance) {
            return Err(ScenarioError::ValidationError(format!(
                "agents.risk_tolerance {} must be within [0, 1]",
                self.agents.risk_tolerance
            )));
        }
        if !(self.agents.lethal_threshold > 0.0 && self.agents.lethal_threshold <= 1.0) {
            return Err(ScenarioError::ValidationError(format!(
                "agents.lethal_threshold {} must be within (0, 1]",
                self.agents.lethal_threshold
            )));
        }

        match self.hazard.kind {
            HazardKind::Fire => {
                for zone in &self.hazard.fire.initial_zones {
                    if zone.center.floor >= layout.floors {
                        return Err(ScenarioError::ValidationError(format!(
                            "fire zone floor {} is outside the building",
                            zone.center.floor
                        )));
                    }
                    if !(0.0..=1.0).contains(&zone.intensity) {
                        return Err(ScenarioError::ValidationError(format!(
                            "fire zone intensity {} must be within [0, 1]",
                            zone.intensity
                        )));
                    }
                }
            }
            HazardKind::Attacker => {
                if let Some(patrol) = &self.hazard.attacker.patrol {
                    if patrol.is_empty() {
                        return Err(ScenarioError::ValidationError("attacker.patrol must not be empty".to_string()));
                    }
                    if let Some(point) = patrol.iter().find(|p| p.floor >= layout.floors) {
                        return Err(ScenarioError::ValidationError(format!(
                            "attacker patrol floor {} is outside the building",
                            point.floor
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// 建物の格子レイアウト
    pub fn layout(&self) -> BuildingLayout {
        BuildingLayout {
            floors: self.building.floors,
            floor_height: self.building.floor_height_m,
            grid_size: self.building.grid_size,
            cell_size: self.building.cell_size_m,
        }
    }

    pub fn start_position(&self) -> Position {
        self.mission.start.to_position(self.building.floor_height_m)
    }

    pub fn target_position(&self) -> Position {
        self.mission.target.to_position(self.building.floor_height_m)
    }

    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            risk_tolerance: self.agents.risk_tolerance,
            lethal_threshold: self.agents.lethal_threshold,
            rescue_radius: self.agents.rescue_radius_m,
        }
    }

    /// ナビゲーショングラフを構築
    pub fn build_graph(&self) -> Result<NavGraph, ScenarioError> {
        Ok(NavGraph::from_layout(self.layout())?)
    }

    /// 襲撃者の巡回経路（省略時は既定経路）
    pub fn attacker_patrol(&self) -> Vec<Position> {
        let fh = self.building.floor_height_m;
        match &self.hazard.attacker.patrol {
            Some(patrol) => patrol.iter().map(|p| p.to_position(fh)).collect(),
            None => AttackerZone::default_patrol(&self.layout()),
        }
    }

    /// 指定シードで危険度フィールドを構築
    ///
    /// 火災は明示指定の初期ゾーン、映像解析ヒント、ランダム配置の順に優先します。
    pub fn build_hazard_field(&self, seed: u64) -> Result<HazardField, ScenarioError> {
        let layout = self.layout();
        let params = self.hazard.fire.spread;

        match self.hazard.kind {
            HazardKind::Fire if !self.hazard.fire.initial_zones.is_empty() => {
                let mut field = HazardField::new(layout, params, seed);
                for zone in &self.hazard.fire.initial_zones {
                    field.ignite(zone.center.to_position(layout.floor_height), zone.intensity, zone.radius_m);
                }
                Ok(field)
            }
            HazardKind::Fire => Ok(HazardField::with_hinted_fires(layout, params, seed, &self.fire_hints)),
            HazardKind::Attacker => {
                let attacker = &self.hazard.attacker;
                let zone = AttackerZone::new(
                    self.attacker_patrol(),
                    attacker.speed_mps,
                    attacker.radius_m,
                    attacker.intensity,
                    layout.floor_height,
                )
                .ok_or_else(|| ScenarioError::ValidationError("attacker.patrol must not be empty".to_string()))?;
                let mut field = HazardField::new(layout, params, seed);
                field.add_source(HazardSource::Attacker(zone));
                Ok(field)
            }
        }
    }

    /// シナリオの概要を表示
    pub fn print_summary(&self) {
        println!("=== シナリオ情報 ===");
        println!("名前: {}", self.meta.name);
        println!("説明: {}", self.meta.description);
        println!("バージョン: {}", self.meta.version);
        println!();

        println!("=== シミュレーション設定 ===");
        println!("時間刻み: {:.3}秒", self.sim.dt_s);
        println!("最大時間: {:.1}秒 ({:.1}分)", self.sim.t_max_s, self.sim.t_max_s / 60.0);
        println!("シード値: {}", self.sim.seed);
        println!();

        println!("=== 建物 ===");
        println!(
            "{}階建て (階高 {:.1}m), {}×{}格子 (セル {:.1}m)",
            self.building.floors,
            self.building.floor_height_m,
            self.building.grid_size,
            self.building.grid_size,
            self.building.cell_size_m
        );
        println!("開始位置: {}", self.start_position());
        println!("救助目標: {}", self.target_position());
        println!();

        println!("=== 救助エージェント ===");
        println!("人数: {}名", self.agents.count);
        println!(
            "リスク許容度: {:.2}, 致死閾値: {:.2}",
            self.agents.risk_tolerance, self.agents.lethal_threshold
        );
        println!();

        println!("=== 危険源 ===");
        match self.hazard.kind {
            HazardKind::Fire => {
                let zones = &self.hazard.fire.initial_zones;
                if !zones.is_empty() {
                    println!("火災: 初期ゾーン{}箇所（明示指定）", zones.len());
                } else if !self.fire_hints.is_empty() {
                    println!("火災: 映像解析ヒント{}件から配置", self.fire_hints.len());
                } else {
                    println!("火災: ランダム配置");
                }
                println!(
                    "延焼: 閾値 {:.2}, 確率 {:.2}, 上階 {:.2}",
                    self.hazard.fire.spread.spawn_threshold,
                    self.hazard.fire.spread.spawn_probability,
                    self.hazard.fire.spread.upward_probability
                );
            }
            HazardKind::Attacker => {
                let attacker = &self.hazard.attacker;
                println!(
                    "襲撃者: 巡回点{}箇所, 速度 {:.1}m/s, 半径 {:.1}m, 強度 {:.2}",
                    self.attacker_patrol().len(),
                    attacker.speed_mps,
                    attacker.radius_m,
                    attacker.intensity
                );
            }
        }
    }
}

/// シナリオ読み込みエラー
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("シナリオファイルが見つかりません: {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("ファイル読み込みエラー {}: {}", .0.display(), .1)]
    IoError(PathBuf, #[source] std::io::Error),
    #[error("YAML解析エラー {}: {}", .0.display(), .1)]
    ParseError(PathBuf, #[source] serde_yaml::Error),
    #[error("設定検証エラー: {0}")]
    ValidationError(String),
    #[error("建物設定エラー: {0}")]
    Graph(#[from] NavGraphError),
}
