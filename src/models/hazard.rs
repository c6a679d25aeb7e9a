//! # Hazard モジュール
//!
//! 時間とともに変化する危険源（火災ゾーン・巡回する襲撃者）を管理し、
//! 任意の位置の危険度を返す `HazardField` を提供します。
//!
//! - **FireZone**: 強度と半径が単調に増加し、十分に高温になると近傍
//!   （確率的に上の階）へ新しい火災ゾーンを発生させます。
//! - **AttackerZone**: 固定の巡回経路を一定速度で周回します。強度は一定です。
//!
//! エージェントは `check_safety` のみで危険度を参照します。経路コストへの反映は
//! 各ティックの開始時に `sync_to_graph` で行います。

use rand::Rng;
use rand_chacha::ChaCha12Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::models::{
    common::Position,
    nav_graph::{BuildingLayout, NavGraph},
    traits::IHazard,
};
use crate::rng::create_rng;

/// この値未満の危険度の位置を安全とみなす
pub const SAFETY_THRESHOLD: f64 = 0.3;
/// 学習ヒント由来の既知危険位置の強度（経路コストのみに影響）
pub const SOFT_DANGER_INTENSITY: f64 = 0.5;

/// ランダム配置時の火災初期強度
pub const FIRE_INITIAL_INTENSITY: f64 = 0.5;
/// 映像解析ヒントによる配置時の火災初期強度
pub const FIRE_HINTED_INTENSITY: f64 = 0.6;
/// 火災ゾーンの初期半径（メートル）
pub const FIRE_INITIAL_RADIUS_M: f64 = 2.0;
/// 初期火災を配置する階
const FIRE_START_FLOORS: [u32; 3] = [0, 1, 2];
/// 映像解析ヒントから配置する火災の最大数
const MAX_HINTED_FIRES: usize = 3;
/// 巡回点への到着判定の誤差
const ARRIVAL_EPSILON_M: f64 = 1e-9;

/// 襲撃者の移動速度（m/s）
pub const ATTACKER_SPEED_MPS: f64 = 1.5;
/// 襲撃者の危険半径（メートル）
pub const ATTACKER_RADIUS_M: f64 = 3.0;
/// 襲撃者の強度
pub const ATTACKER_INTENSITY: f64 = 0.9;

/// 危険源の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HazardKind {
    Fire,
    Attacker,
}

impl std::fmt::Display for HazardKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HazardKind::Fire => write!(f, "fire"),
            HazardKind::Attacker => write!(f, "attacker"),
        }
    }
}

/// 火災の成長・延焼パラメータ
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FireSpreadParams {
    /// 強度の増加率（毎秒）
    pub intensity_rate: f64,
    /// 半径の拡大率（m/s）
    pub spread_rate: f64,
    /// 半径の上限（メートル）
    pub max_radius: f64,
    /// 延焼が起こる強度の閾値
    pub spawn_threshold: f64,
    /// 更新1回あたりの延焼確率
    pub spawn_probability: f64,
    /// 延焼先の水平方向のばらつき（±メートル）
    pub spawn_jitter: f64,
    /// 延焼が上の階に向かう確率
    pub upward_probability: f64,
    /// 延焼で生じたゾーンの初期強度
    pub spawn_intensity: f64,
    /// 延焼で生じたゾーンの初期半径
    pub spawn_radius: f64,
    /// 既存ゾーンとの重複判定距離（メートル）
    pub dedup_distance: f64,
}

impl Default for FireSpreadParams {
    fn default() -> Self {
        Self {
            intensity_rate: 0.05,
            spread_rate: 0.1,
            max_radius: 5.0,
            spawn_threshold: 0.7,
            spawn_probability: 0.3,
            spawn_jitter: 3.0,
            upward_probability: 0.4,
            spawn_intensity: 0.4,
            spawn_radius: 1.5,
            dedup_distance: 2.0,
        }
    }
}

/// 映像解析コラボレーターからの火災発生ヒント
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FireIncidenceHint {
    /// 火災が検出されたフレーム番号
    pub frame_index: u32,
    /// 推定される階
    pub floor: u32,
}

/// 火災ゾーン
#[derive(Debug, Clone)]
pub struct FireZone {
    pub center: Position,
    pub radius: f64,
    pub intensity: f64,
    /// 発生時刻（シミュレーション経過秒）
    pub ignited_at: f64,
    intensity_rate: f64,
    spread_rate: f64,
    max_radius: f64,
}

impl FireZone {
    pub fn new(
        center: Position,
        intensity: f64,
        radius: f64,
        ignited_at: f64,
        params: &FireSpreadParams,
    ) -> Self {
        Self {
            center,
            radius: radius.max(0.0),
            intensity: intensity.clamp(0.0, 1.0),
            ignited_at,
            intensity_rate: params.intensity_rate.max(0.0),
            spread_rate: params.spread_rate.max(0.0),
            max_radius: params.max_radius,
        }
    }
}

impl IHazard for FireZone {
    fn kind(&self) -> HazardKind {
        HazardKind::Fire
    }

    fn center(&self) -> Position {
        self.center
    }

    fn radius(&self) -> f64 {
        self.radius
    }

    fn intensity(&self) -> f64 {
        self.intensity
    }

    fn advance(&mut self, dt: f64) {
        let dt = dt.max(0.0);
        self.intensity = (self.intensity + self.intensity_rate * dt).min(1.0);
        // 上限を超えて生成されたゾーンを縮めない
        let grown = (self.radius + self.spread_rate * dt).min(self.max_radius);
        self.radius = self.radius.max(grown);
    }
}

/// 巡回する襲撃者
#[derive(Debug, Clone)]
pub struct AttackerZone {
    pub center: Position,
    pub radius: f64,
    pub intensity: f64,
    /// 移動速度（m/s）
    pub speed: f64,
    patrol: Vec<Position>,
    target_index: usize,
    floor_height: f64,
}

impl AttackerZone {
    /// 巡回経路の先頭から開始する襲撃者を作成
    ///
    /// # 戻り値
    ///
    /// 巡回経路が空の場合はNone
    pub fn new(
        patrol: Vec<Position>,
        speed: f64,
        radius: f64,
        intensity: f64,
        floor_height: f64,
    ) -> Option<Self> {
        let center = *patrol.first()?;
        Some(Self {
            center,
            radius: radius.max(0.0),
            intensity: intensity.clamp(0.0, 1.0),
            speed: speed.max(0.0),
            target_index: 1 % patrol.len(),
            patrol,
            floor_height,
        })
    }

    /// 既定の巡回経路（最上階とその1つ下の階を、階段室を経由して周回）
    ///
    /// 4階建て20×20格子では2階・3階の (5,5) → (15,5) → (15,15) → (5,15) → 階段室 の順です。
    pub fn default_patrol(layout: &BuildingLayout) -> Vec<Position> {
        let upper = layout.floors.saturating_sub(1);
        let lower = layout.floors.saturating_sub(2);
        let extent = layout.extent();
        let near = extent * 0.25;
        let far = extent * 0.75;
        let center = (layout.grid_size / 2) as f64 * layout.cell_size;
        let fh = layout.floor_height;

        let mut patrol = Vec::with_capacity(10);
        for (floor, next_floor) in [(lower, upper), (upper, lower)] {
            patrol.push(Position::on_floor(near, near, floor, fh));
            patrol.push(Position::on_floor(far, near, floor, fh));
            patrol.push(Position::on_floor(far, far, floor, fh));
            patrol.push(Position::on_floor(near, far, floor, fh));
            patrol.push(Position::on_floor(center, center, next_floor, fh));
        }
        patrol
    }

    pub fn patrol(&self) -> &[Position] {
        &self.patrol
    }

    /// 次に向かう巡回点のインデックス
    pub fn target_index(&self) -> usize {
        self.target_index
    }

    /// 巡回経路1周の長さ（メートル）
    pub fn loop_length(&self) -> f64 {
        let n = self.patrol.len();
        (0..n)
            .map(|i| self.patrol[i].distance_to(&self.patrol[(i + 1) % n]))
            .sum()
    }
}

impl IHazard for AttackerZone {
    fn kind(&self) -> HazardKind {
        HazardKind::Attacker
    }

    fn center(&self) -> Position {
        self.center
    }

    fn radius(&self) -> f64 {
        self.radius
    }

    fn intensity(&self) -> f64 {
        self.intensity
    }

    /// 巡回点に向かって等速直線移動
    ///
    /// 到着した巡回点にはスナップし、残りの移動距離で次の巡回点へ進みます。
    /// 1周を超える移動距離は周回分を除いてから進めます。
    fn advance(&mut self, dt: f64) {
        let loop_length = self.loop_length();
        if loop_length < 1e-9 {
            return;
        }

        let travel = self.speed * dt.max(0.0);
        if !travel.is_finite() {
            return;
        }
        let mut remaining = travel % loop_length;
        while remaining > 0.0 {
            let target = self.patrol[self.target_index];
            let distance = self.center.distance_to(&target);
            if distance <= remaining + ARRIVAL_EPSILON_M {
                self.center = target;
                remaining -= distance;
                self.target_index = (self.target_index + 1) % self.patrol.len();
            } else {
                self.center = self.center.step_towards(&target, remaining, self.floor_height);
                remaining = 0.0;
            }
        }
    }
}

/// 危険源
#[derive(Debug, Clone)]
pub enum HazardSource {
    Fire(FireZone),
    Attacker(AttackerZone),
}

impl IHazard for HazardSource {
    fn kind(&self) -> HazardKind {
        match self {
            HazardSource::Fire(zone) => zone.kind(),
            HazardSource::Attacker(zone) => zone.kind(),
        }
    }

    fn center(&self) -> Position {
        match self {
            HazardSource::Fire(zone) => zone.center(),
            HazardSource::Attacker(zone) => zone.center(),
        }
    }

    fn radius(&self) -> f64 {
        match self {
            HazardSource::Fire(zone) => zone.radius(),
            HazardSource::Attacker(zone) => zone.radius(),
        }
    }

    fn intensity(&self) -> f64 {
        match self {
            HazardSource::Fire(zone) => zone.intensity(),
            HazardSource::Attacker(zone) => zone.intensity(),
        }
    }

    fn advance(&mut self, dt: f64) {
        match self {
            HazardSource::Fire(zone) => zone.advance(dt),
            HazardSource::Attacker(zone) => zone.advance(dt),
        }
    }
}

/// 描画・記録用の危険源スナップショット
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneSnapshot {
    pub kind: HazardKind,
    pub center: Position,
    pub radius: f64,
    pub intensity: f64,
}

impl From<&HazardSource> for ZoneSnapshot {
    fn from(source: &HazardSource) -> Self {
        Self {
            kind: source.kind(),
            center: source.center(),
            radius: source.radius(),
            intensity: source.intensity(),
        }
    }
}

/// 危険度フィールド
///
/// 全危険源を保持し、固定時間刻みで更新します。乱数はシードから生成した
/// 専用の系列のみを使用するため、同じシードからは同じ推移が得られます。
#[derive(Debug, Clone)]
pub struct HazardField {
    layout: BuildingLayout,
    fire_params: FireSpreadParams,
    sources: Vec<HazardSource>,
    soft_sources: Vec<Position>,
    rng: ChaCha12Rng,
    elapsed: f64,
}

impl HazardField {
    /// 危険源を持たないフィールドを作成
    pub fn new(layout: BuildingLayout, fire_params: FireSpreadParams, seed: u64) -> Self {
        Self {
            layout,
            fire_params,
            sources: Vec::new(),
            soft_sources: Vec::new(),
            rng: create_rng(seed),
            elapsed: 0.0,
        }
    }

    /// 1〜3階（存在する階のみ）にランダムな初期火災を配置
    ///
    /// 水平位置は床面の中央半分の範囲から選びます。
    pub fn with_random_fires(layout: BuildingLayout, fire_params: FireSpreadParams, seed: u64) -> Self {
        let mut field = Self::new(layout, fire_params, seed);
        for floor in FIRE_START_FLOORS.into_iter().filter(|f| *f < layout.floors) {
            let center = field.random_fire_center(floor);
            field.ignite(center, FIRE_INITIAL_INTENSITY, FIRE_INITIAL_RADIUS_M);
        }
        info!("ランダムな初期火災を配置: {}箇所", field.sources.len());
        field
    }

    /// 映像解析ヒントの階に初期火災を配置（最大3箇所）
    ///
    /// ヒントが空の場合はランダム配置にフォールバックします。
    pub fn with_hinted_fires(
        layout: BuildingLayout,
        fire_params: FireSpreadParams,
        seed: u64,
        hints: &[FireIncidenceHint],
    ) -> Self {
        if hints.is_empty() {
            return Self::with_random_fires(layout, fire_params, seed);
        }

        let mut field = Self::new(layout, fire_params, seed);
        for hint in hints.iter().take(MAX_HINTED_FIRES) {
            let floor = hint.floor.min(layout.floors.saturating_sub(1));
            let center = field.random_fire_center(floor);
            field.ignite(center, FIRE_HINTED_INTENSITY, FIRE_INITIAL_RADIUS_M);
            debug!("フレーム{}のヒントから{}階に火災を配置", hint.frame_index, floor);
        }
        info!("映像解析ヒントから初期火災を配置: {}箇所", field.sources.len());
        field
    }

    fn random_fire_center(&mut self, floor: u32) -> Position {
        let extent = self.layout.extent();
        let x = self.rng.gen_range(extent * 0.25..=extent * 0.75);
        let y = self.rng.gen_range(extent * 0.25..=extent * 0.75);
        Position::on_floor(x, y, floor, self.layout.floor_height)
    }

    /// 指定位置に火災ゾーンを追加
    pub fn ignite(&mut self, center: Position, intensity: f64, radius: f64) {
        let zone = FireZone::new(center, intensity, radius, self.elapsed, &self.fire_params);
        self.sources.push(HazardSource::Fire(zone));
    }

    pub fn add_source(&mut self, source: HazardSource) {
        self.sources.push(source);
    }

    /// 既知の危険位置を弱い危険源として追加
    ///
    /// 経路コストのみに影響し、`check_safety` には含まれません。
    pub fn add_soft_sources(&mut self, positions: &[Position]) {
        self.soft_sources.extend_from_slice(positions);
    }

    pub fn layout(&self) -> &BuildingLayout {
        &self.layout
    }

    /// 累積経過時間（秒）
    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    /// 有効な危険源の一覧
    pub fn active_zones(&self) -> &[HazardSource] {
        &self.sources
    }

    pub fn soft_sources(&self) -> &[Position] {
        &self.soft_sources
    }

    pub fn zone_snapshots(&self) -> Vec<ZoneSnapshot> {
        self.sources.iter().map(ZoneSnapshot::from).collect()
    }

    /// 危険源を経過時間分だけ進める
    ///
    /// 全ゾーンを成長・移動させた後、延焼判定を行います。負の経過時間は0として扱います。
    pub fn update(&mut self, elapsed_seconds: f64) {
        let dt = elapsed_seconds.max(0.0);
        self.elapsed += dt;

        for source in &mut self.sources {
            source.advance(dt);
        }

        self.spread_fire();
    }

    fn spread_fire(&mut self) {
        let params = self.fire_params;
        let spawn_probability = params.spawn_probability.clamp(0.0, 1.0);
        let upward_probability = params.upward_probability.clamp(0.0, 1.0);
        let jitter = params.spawn_jitter.max(0.0);
        let top_floor = self.layout.floors.saturating_sub(1);

        let mut spawned: Vec<Position> = Vec::new();
        for source in &self.sources {
            let HazardSource::Fire(zone) = source else {
                continue;
            };
            if zone.intensity <= params.spawn_threshold || !self.rng.gen_bool(spawn_probability) {
                continue;
            }

            let x = zone.center.x() + self.rng.gen_range(-jitter..=jitter);
            let y = zone.center.y() + self.rng.gen_range(-jitter..=jitter);
            // 熱は上に向かう
            let rises = self.rng.gen_bool(upward_probability);
            let floor = if rises && zone.center.floor() < top_floor {
                zone.center.floor() + 1
            } else {
                zone.center.floor()
            };

            if !self.layout.contains_xy(x, y) {
                continue;
            }

            let candidate = Position::on_floor(x, y, floor, self.layout.floor_height);
            let crowded = self
                .sources
                .iter()
                .filter(|s| s.kind() == HazardKind::Fire)
                .map(|s| s.center())
                .chain(spawned.iter().copied())
                .any(|c| c.distance_to(&candidate) < params.dedup_distance);
            if !crowded {
                spawned.push(candidate);
            }
        }

        for center in spawned {
            debug!("延焼: 新しい火災ゾーン {}", center);
            self.ignite(center, params.spawn_intensity, params.spawn_radius);
        }
    }

    /// 位置の安全性を評価
    ///
    /// # 戻り値
    ///
    /// (安全かどうか, 全危険源の中での最大危険度)
    pub fn check_safety(&self, position: &Position) -> (bool, f64) {
        let danger = self
            .sources
            .iter()
            .map(|s| s.danger_at(position))
            .fold(0.0, f64::max);
        (danger < SAFETY_THRESHOLD, danger)
    }

    /// 現在の危険源をナビゲーショングラフの危険度に反映
    ///
    /// エージェントが経路を再計画する前に、各ティックで1回呼び出す必要があります。
    pub fn sync_to_graph(&self, graph: &mut NavGraph) {
        let danger_sources: Vec<(Position, f64)> = self
            .sources
            .iter()
            .map(|s| (s.center(), s.intensity()))
            .chain(self.soft_sources.iter().map(|p| (*p, SOFT_DANGER_INTENSITY)))
            .collect();
        graph.update_danger(&danger_sources);
    }

    /// 火災ゾーンの数
    pub fn fire_zone_count(&self) -> usize {
        self.sources
            .iter()
            .filter(|s| s.kind() == HazardKind::Fire)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> BuildingLayout {
        BuildingLayout::default()
    }

    fn square_attacker(speed: f64) -> AttackerZone {
        let patrol = vec![
            Position::on_floor(5.0, 5.0, 0, 3.0),
            Position::on_floor(15.0, 5.0, 0, 3.0),
            Position::on_floor(15.0, 15.0, 0, 3.0),
            Position::on_floor(5.0, 15.0, 0, 3.0),
        ];
        AttackerZone::new(patrol, speed, ATTACKER_RADIUS_M, ATTACKER_INTENSITY, 3.0).unwrap()
    }

    #[test]
    fn test_fire_growth_is_monotonic_and_clamped() {
        let params = FireSpreadParams {
            spawn_probability: 0.0,
            ..FireSpreadParams::default()
        };
        let mut field = HazardField::new(layout(), params, 1);
        field.ignite(Position::on_floor(10.0, 10.0, 0, 3.0), 0.5, 2.0);

        let mut last = (0.5, 2.0);
        for dt in [0.0, 0.5, 1.0, 3.0, 0.25, 20.0, 100.0, -5.0] {
            field.update(dt);
            let zone = &field.active_zones()[0];
            assert!(zone.intensity() >= last.0);
            assert!(zone.radius() >= last.1);
            last = (zone.intensity(), zone.radius());
        }
        assert!((last.0 - 1.0).abs() < 1e-9);
        assert!((last.1 - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_fire_grows_by_rate() {
        let mut field = HazardField::new(layout(), FireSpreadParams::default(), 1);
        field.ignite(Position::on_floor(10.0, 10.0, 1, 3.0), 0.5, 2.0);
        field.update(2.0);
        let zone = &field.active_zones()[0];
        assert!((zone.intensity() - 0.6).abs() < 1e-9);
        assert!((zone.radius() - 2.2).abs() < 1e-9);
        assert_eq!(field.fire_zone_count(), 1);
    }

    #[test]
    fn test_hot_fire_spreads_upward() {
        let params = FireSpreadParams {
            spawn_probability: 1.0,
            upward_probability: 1.0,
            dedup_distance: 0.0,
            ..FireSpreadParams::default()
        };
        let mut field = HazardField::new(layout(), params, 3);
        field.ignite(Position::on_floor(10.0, 10.0, 1, 3.0), 0.9, 2.0);
        field.update(0.5);

        assert_eq!(field.fire_zone_count(), 2);
        let spawned = field.active_zones()[1].center();
        assert_eq!(spawned.floor(), 2);
        assert!((spawned.x() - 10.0).abs() <= 3.0);
        assert!((spawned.y() - 10.0).abs() <= 3.0);
        assert!((field.active_zones()[1].intensity() - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_fire_spread_respects_top_floor_and_dedup() {
        let params = FireSpreadParams {
            spawn_probability: 1.0,
            upward_probability: 1.0,
            dedup_distance: 100.0,
            ..FireSpreadParams::default()
        };
        let mut field = HazardField::new(layout(), params, 3);
        field.ignite(Position::on_floor(10.0, 10.0, 3, 3.0), 1.0, 2.0);
        for _ in 0..10 {
            field.update(0.5);
        }
        assert_eq!(field.fire_zone_count(), 1);
    }

    #[test]
    fn test_cool_fire_does_not_spread() {
        let params = FireSpreadParams {
            spawn_probability: 1.0,
            intensity_rate: 0.0,
            dedup_distance: 0.0,
            ..FireSpreadParams::default()
        };
        let mut field = HazardField::new(layout(), params, 3);
        field.ignite(Position::on_floor(10.0, 10.0, 0, 3.0), 0.7, 2.0);
        field.update(1.0);
        assert_eq!(field.fire_zone_count(), 1);
    }

    #[test]
    fn test_attacker_completes_patrol_loop() {
        let mut attacker = square_attacker(2.0);
        let loop_seconds = attacker.loop_length() / attacker.speed;
        assert!((loop_seconds - 20.0).abs() < 1e-9);

        for _ in 0..10 {
            attacker.advance(0.5);
        }
        assert_eq!(attacker.center(), Position::on_floor(15.0, 5.0, 0, 3.0));
        assert_eq!(attacker.target_index(), 2);

        for _ in 0..30 {
            attacker.advance(0.5);
        }
        assert_eq!(attacker.center(), attacker.patrol()[0]);
        assert_eq!(attacker.target_index(), 1);
    }

    #[test]
    fn test_attacker_loop_with_uneven_ticks() {
        let mut attacker = square_attacker(1.5);
        let loop_seconds = attacker.loop_length() / attacker.speed;
        let ticks = 64;
        for _ in 0..ticks {
            attacker.advance(loop_seconds / ticks as f64);
        }
        assert!(attacker.center().distance_to(&attacker.patrol()[0]) < 0.1);
    }

    #[test]
    fn test_attacker_long_step_wraps_whole_loops() {
        let mut field = HazardField::new(layout(), FireSpreadParams::default(), 0);
        field.add_source(HazardSource::Attacker(square_attacker(2.0)));
        field.update(1.0e12);
        assert_eq!(field.active_zones()[0].center(), Position::on_floor(5.0, 5.0, 0, 3.0));

        // 50000周 + 10m
        let mut attacker = square_attacker(2.0);
        attacker.advance(1.0e6 + 5.0);
        assert_eq!(attacker.center(), Position::on_floor(15.0, 5.0, 0, 3.0));
        assert_eq!(attacker.target_index(), 2);

        let mut attacker = AttackerZone::new(AttackerZone::default_patrol(&layout()), 1.5, 3.0, 0.9, 3.0).unwrap();
        let before = attacker.center();
        attacker.advance(f64::INFINITY);
        assert_eq!(attacker.center(), before);
        attacker.advance(1.0e12);
        assert_eq!(attacker.center().floor(), (attacker.center().z() / 3.0).round() as u32);
    }

    #[test]
    fn test_attacker_changes_floor_via_stairwell() {
        let patrol = AttackerZone::default_patrol(&layout());
        assert_eq!(patrol.len(), 10);
        assert_eq!(patrol[0], Position::on_floor(5.0, 5.0, 2, 3.0));
        assert_eq!(patrol[4], Position::on_floor(10.0, 10.0, 3, 3.0));
        assert_eq!(patrol[9], Position::on_floor(10.0, 10.0, 2, 3.0));

        let mut attacker = AttackerZone::new(patrol, 1.5, 3.0, 0.9, 3.0).unwrap();
        let mut seen_floors = std::collections::BTreeSet::new();
        for _ in 0..200 {
            attacker.advance(0.5);
            let c = attacker.center();
            assert_eq!(c.floor(), (c.z() / 3.0).round() as u32);
            seen_floors.insert(c.floor());
        }
        assert!(seen_floors.contains(&2) && seen_floors.contains(&3));
    }

    #[test]
    fn test_attacker_requires_patrol() {
        assert!(AttackerZone::new(Vec::new(), 1.5, 3.0, 0.9, 3.0).is_none());
    }

    #[test]
    fn test_check_safety_falloff_and_threshold() {
        let mut field = HazardField::new(layout(), FireSpreadParams::default(), 0);
        let center = Position::on_floor(5.0, 5.0, 0, 3.0);
        let patrol = vec![center];
        let attacker = AttackerZone::new(patrol, 0.0, 3.0, 0.9, 3.0).unwrap();
        field.add_source(HazardSource::Attacker(attacker));

        let (safe, danger) = field.check_safety(&center);
        assert!(!safe);
        assert!((danger - 0.9).abs() < 1e-9);

        let (safe, danger) = field.check_safety(&Position::on_floor(6.0, 5.0, 0, 3.0));
        assert!(!safe);
        assert!((danger - 0.6).abs() < 1e-9);

        let (safe, danger) = field.check_safety(&Position::on_floor(7.5, 5.0, 0, 3.0));
        assert!(safe);
        assert!((danger - 0.15).abs() < 1e-9);

        assert_eq!(field.check_safety(&Position::on_floor(5.0, 5.0, 1, 3.0)), (true, 0.0));
    }

    #[test]
    fn test_check_safety_takes_maximum() {
        let mut field = HazardField::new(layout(), FireSpreadParams::default(), 0);
        field.ignite(Position::on_floor(5.0, 5.0, 0, 3.0), 0.5, 2.0);
        field.ignite(Position::on_floor(6.0, 5.0, 0, 3.0), 0.8, 2.0);
        let (_, danger) = field.check_safety(&Position::on_floor(5.0, 5.0, 0, 3.0));
        assert!((danger - 0.5f64.max(0.8 * 0.5)).abs() < 1e-9);
    }

    #[test]
    fn test_sync_to_graph_includes_soft_sources() {
        let layout = BuildingLayout {
            floors: 1,
            grid_size: 10,
            ..BuildingLayout::default()
        };
        let mut graph = NavGraph::from_layout(layout).unwrap();
        let mut field = HazardField::new(layout, FireSpreadParams::default(), 0);
        let fire = Position::on_floor(2.0, 2.0, 0, 3.0);
        let known = Position::on_floor(8.0, 8.0, 0, 3.0);
        field.ignite(fire, 0.7, 2.0);
        field.add_soft_sources(&[known]);

        field.sync_to_graph(&mut graph);
        assert!((graph.danger_at(&fire) - 0.7).abs() < 1e-9);
        assert!((graph.danger_at(&known) - SOFT_DANGER_INTENSITY).abs() < 1e-9);
        // 既知危険位置は安全判定には影響しない
        assert_eq!(field.check_safety(&known), (true, 0.0));
    }

    #[test]
    fn test_random_fires_are_deterministic() {
        let a = HazardField::with_random_fires(layout(), FireSpreadParams::default(), 99);
        let b = HazardField::with_random_fires(layout(), FireSpreadParams::default(), 99);
        assert_eq!(a.fire_zone_count(), 3);
        for (za, zb) in a.active_zones().iter().zip(b.active_zones()) {
            assert_eq!(za.center(), zb.center());
        }
        for (floor, zone) in a.active_zones().iter().enumerate() {
            let c = zone.center();
            assert_eq!(c.floor(), floor as u32);
            assert!((5.0..=15.0).contains(&c.x()) && (5.0..=15.0).contains(&c.y()));
            assert!((zone.intensity() - FIRE_INITIAL_INTENSITY).abs() < 1e-9);
        }
    }

    #[test]
    fn test_random_fires_limited_to_existing_floors() {
        let small = BuildingLayout {
            floors: 2,
            ..BuildingLayout::default()
        };
        let field = HazardField::with_random_fires(small, FireSpreadParams::default(), 5);
        assert_eq!(field.fire_zone_count(), 2);
    }

    #[test]
    fn test_hinted_fires_follow_hint_floors() {
        let hints = [
            FireIncidenceHint { frame_index: 30, floor: 3 },
            FireIncidenceHint { frame_index: 60, floor: 9 },
            FireIncidenceHint { frame_index: 90, floor: 1 },
            FireIncidenceHint { frame_index: 120, floor: 0 },
        ];
        let field = HazardField::with_hinted_fires(layout(), FireSpreadParams::default(), 5, &hints);
        let floors: Vec<u32> = field.active_zones().iter().map(|z| z.center().floor()).collect();
        assert_eq!(floors, vec![3, 3, 1]);
        assert!(field
            .active_zones()
            .iter()
            .all(|z| (z.intensity() - FIRE_HINTED_INTENSITY).abs() < 1e-9));
    }
}
