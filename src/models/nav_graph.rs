//! # NavGraph モジュール
//!
//! 多層建物の格子状ナビゲーショングラフと、危険度を加味した最短経路探索を提供します。
//!
//! 各階に `grid_size × grid_size` のノードを配置し、同一階の4近傍を水平エッジで、
//! 階段室の範囲内のノードを上下階の同位置ノードと垂直エッジで接続します。
//! 隣接関係はノードインデックスで引くエッジリスト1本のみで保持します。
//!
//! 危険度はトポロジーを変えずにエッジコストへ反映します。`avoid_danger` が
//! 有効な探索では、エッジの到着側ノードの危険度 `d` に対して
//! コストを `1 + d × 10` 倍します（出発側や中間点は評価しません）。

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::ops::RangeInclusive;

use tracing::{debug, info};

use crate::models::common::{Position, RoomType, POSITION_TOLERANCE_M};

/// 危険源の影響半径（メートル）
pub const DANGER_RADIUS_M: f64 = 3.0;
/// 危険度からコスト倍率への係数（最大11倍）
pub const DANGER_WEIGHT_FACTOR: f64 = 10.0;
/// 垂直移動コストの階高に対する倍率
pub const VERTICAL_COST_FACTOR: f64 = 2.0;

/// グラフ構築エラー
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NavGraphError {
    #[error("フロア数は1以上が必要です")]
    NoFloors,
    #[error("格子サイズが小さすぎます: {0} (2以上が必要)")]
    DegenerateGrid(usize),
    #[error("階高は正の値が必要です: {0}")]
    InvalidFloorHeight(f64),
    #[error("セルサイズは正の値が必要です: {0}")]
    InvalidCellSize(f64),
}

/// 建物の格子レイアウト
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuildingLayout {
    /// 階数
    pub floors: u32,
    /// 階高（メートル）
    pub floor_height: f64,
    /// 1辺あたりのセル数
    pub grid_size: usize,
    /// セルの1辺の長さ（メートル）
    pub cell_size: f64,
}

impl Default for BuildingLayout {
    fn default() -> Self {
        Self {
            floors: 4,
            floor_height: 3.0,
            grid_size: 20,
            cell_size: 1.0,
        }
    }
}

impl BuildingLayout {
    /// レイアウトパラメータの検証
    pub fn validate(&self) -> Result<(), NavGraphError> {
        if self.floors == 0 {
            return Err(NavGraphError::NoFloors);
        }
        if self.grid_size <= 1 {
            return Err(NavGraphError::DegenerateGrid(self.grid_size));
        }
        if !(self.floor_height > 0.0) {
            return Err(NavGraphError::InvalidFloorHeight(self.floor_height));
        }
        if !(self.cell_size > 0.0) {
            return Err(NavGraphError::InvalidCellSize(self.cell_size));
        }
        Ok(())
    }

    /// 1階分の床面の1辺の長さ（メートル）
    pub fn extent(&self) -> f64 {
        self.grid_size as f64 * self.cell_size
    }

    /// XY座標が床面内かどうか
    pub fn contains_xy(&self, x: f64, y: f64) -> bool {
        let extent = self.extent();
        (0.0..extent).contains(&x) && (0.0..extent).contains(&y)
    }

    /// 中央の階段室ブロックの格子範囲（i, j 共通）
    ///
    /// 20×20 格子では 8..=11 となります。
    pub fn stairwell_range(&self) -> RangeInclusive<usize> {
        let center = self.grid_size / 2;
        let half = (self.grid_size / 10).max(1);
        let lo = center.saturating_sub(half);
        let hi = (center + half - 1).min(self.grid_size - 1);
        lo..=hi
    }

    /// 格子セルの区画種別を固定規則で判定
    ///
    /// 判定順: 中央ブロック = 階段室、中央の行/列 = 廊下、1階外周 = 出口、それ以外 = 部屋
    pub fn classify(&self, i: usize, j: usize, floor: u32) -> RoomType {
        let stairwell = self.stairwell_range();
        if stairwell.contains(&i) && stairwell.contains(&j) {
            return RoomType::Stairwell;
        }

        let center = self.grid_size / 2;
        if i == center || j == center {
            return RoomType::Hallway;
        }

        let last = self.grid_size - 1;
        if floor == 0 && (i == 0 || j == 0 || i == last || j == last) {
            return RoomType::Exit;
        }

        RoomType::Room
    }

    /// 格子座標に対応する位置
    pub fn position_of(&self, floor: u32, i: usize, j: usize) -> Position {
        Position::on_floor(
            i as f64 * self.cell_size,
            j as f64 * self.cell_size,
            floor,
            self.floor_height,
        )
    }

    /// 位置を格子座標に変換（格子点から許容誤差以上ずれていればNone）
    pub fn grid_coords(&self, position: &Position) -> Option<(u32, usize, usize)> {
        if position.floor() >= self.floors {
            return None;
        }
        let expected_z = position.floor() as f64 * self.floor_height;
        if (position.z() - expected_z).abs() >= POSITION_TOLERANCE_M {
            return None;
        }

        let i = self.snap_axis(position.x())?;
        let j = self.snap_axis(position.y())?;
        Some((position.floor(), i, j))
    }

    fn snap_axis(&self, value: f64) -> Option<usize> {
        let index = (value / self.cell_size).round();
        if index < 0.0 || index >= self.grid_size as f64 {
            return None;
        }
        if (index * self.cell_size - value).abs() >= POSITION_TOLERANCE_M {
            return None;
        }
        Some(index as usize)
    }

    /// 同じ階で最も近い格子座標（床面外の座標は端にクランプ）
    fn nearest_coords(&self, position: &Position) -> Option<(u32, usize, usize)> {
        if position.floor() >= self.floors {
            return None;
        }
        let last = (self.grid_size - 1) as f64;
        let i = (position.x() / self.cell_size).round().clamp(0.0, last) as usize;
        let j = (position.y() / self.cell_size).round().clamp(0.0, last) as usize;
        Some((position.floor(), i, j))
    }
}

/// ナビゲーションノード（1階・1セル）
#[derive(Debug, Clone)]
pub struct NavNode {
    pub position: Position,
    pub room_type: RoomType,
    /// 危険度 [0, 1]
    pub danger_level: f64,
}

/// 無向エッジの片側
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NavEdge {
    pub to: usize,
    /// 基本コスト（ユークリッド距離、垂直は階高の2倍）
    pub weight: f64,
    pub vertical: bool,
}

/// 多層建物のナビゲーショングラフ
#[derive(Debug, Clone)]
pub struct NavGraph {
    layout: BuildingLayout,
    nodes: Vec<NavNode>,
    adjacency: Vec<Vec<NavEdge>>,
    edge_count: usize,
}

impl NavGraph {
    /// パラメータを指定してグラフを構築
    ///
    /// # 引数
    ///
    /// * `floors` - 階数
    /// * `floor_height` - 階高（メートル）
    /// * `grid_size` - 1辺あたりのセル数
    /// * `cell_size` - セルの1辺（メートル）
    pub fn build(
        floors: u32,
        floor_height: f64,
        grid_size: usize,
        cell_size: f64,
    ) -> Result<Self, NavGraphError> {
        Self::from_layout(BuildingLayout {
            floors,
            floor_height,
            grid_size,
            cell_size,
        })
    }

    /// レイアウトからノードを生成し、エッジを接続する
    ///
    /// 同じレイアウトからは常に同じグラフが得られます（乱数は使用しません）。
    pub fn from_layout(layout: BuildingLayout) -> Result<Self, NavGraphError> {
        layout.validate()?;

        let g = layout.grid_size;
        let mut nodes = Vec::with_capacity(layout.floors as usize * g * g);
        for floor in 0..layout.floors {
            for i in 0..g {
                for j in 0..g {
                    nodes.push(NavNode {
                        position: layout.position_of(floor, i, j),
                        room_type: layout.classify(i, j, floor),
                        danger_level: 0.0,
                    });
                }
            }
        }

        let mut graph = Self {
            layout,
            adjacency: vec![Vec::new(); nodes.len()],
            nodes,
            edge_count: 0,
        };
        graph.connect()?;

        info!(
            "ナビゲーショングラフ構築完了: {}階, ノード{}個, エッジ{}本",
            layout.floors,
            graph.nodes.len(),
            graph.edge_count
        );

        Ok(graph)
    }

    /// エッジを(再)接続する
    ///
    /// 同一階の4近傍に水平エッジ、階段室の各セルに上階への垂直エッジを1本ずつ張ります。
    pub fn connect(&mut self) -> Result<(), NavGraphError> {
        self.layout.validate()?;

        for edges in &mut self.adjacency {
            edges.clear();
        }
        self.edge_count = 0;

        let g = self.layout.grid_size;
        for floor in 0..self.layout.floors {
            for i in 0..g {
                for j in 0..g {
                    let from = self.index_of(floor, i, j);
                    if i + 1 < g {
                        let to = self.index_of(floor, i + 1, j);
                        self.add_edge(from, to, false);
                    }
                    if j + 1 < g {
                        let to = self.index_of(floor, i, j + 1);
                        self.add_edge(from, to, false);
                    }
                }
            }
        }

        let stairwell = self.layout.stairwell_range();
        for floor in 0..self.layout.floors.saturating_sub(1) {
            for i in stairwell.clone() {
                for j in stairwell.clone() {
                    let lower = self.index_of(floor, i, j);
                    let upper = self.index_of(floor + 1, i, j);
                    self.add_edge(lower, upper, true);
                }
            }
        }

        Ok(())
    }

    fn add_edge(&mut self, a: usize, b: usize, vertical: bool) {
        let weight = if vertical {
            self.layout.floor_height * VERTICAL_COST_FACTOR
        } else {
            self.nodes[a].position.distance_to(&self.nodes[b].position)
        };
        self.adjacency[a].push(NavEdge { to: b, weight, vertical });
        self.adjacency[b].push(NavEdge { to: a, weight, vertical });
        self.edge_count += 1;
    }

    fn index_of(&self, floor: u32, i: usize, j: usize) -> usize {
        let g = self.layout.grid_size;
        (floor as usize * g + i) * g + j
    }

    /// 格子点に一致する位置のノードインデックス
    pub fn node_index(&self, position: &Position) -> Option<usize> {
        self.layout
            .grid_coords(position)
            .map(|(floor, i, j)| self.index_of(floor, i, j))
    }

    pub fn layout(&self) -> &BuildingLayout {
        &self.layout
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// 無向エッジの本数
    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn nodes(&self) -> &[NavNode] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> Option<&NavNode> {
        self.nodes.get(index)
    }

    pub fn node_at(&self, position: &Position) -> Option<&NavNode> {
        self.node_index(position).map(|index| &self.nodes[index])
    }

    pub fn neighbors(&self, index: usize) -> &[NavEdge] {
        self.adjacency.get(index).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// 同一階の隣接ノード数
    pub fn horizontal_degree(&self, index: usize) -> usize {
        self.neighbors(index).iter().filter(|e| !e.vertical).count()
    }

    /// 位置の危険度（格子点以外は0）
    pub fn danger_at(&self, position: &Position) -> f64 {
        self.node_at(position).map(|n| n.danger_level).unwrap_or(0.0)
    }

    /// 指定した区画種別のノード位置一覧
    pub fn positions_of_type(&self, room_type: RoomType) -> Vec<Position> {
        self.nodes
            .iter()
            .filter(|n| n.room_type == room_type)
            .map(|n| n.position)
            .collect()
    }

    /// 位置に最も近いノードを危険区画として分類し直す
    ///
    /// # 戻り値
    ///
    /// 対象ノードが存在した場合はtrue
    pub fn mark_danger_zone(&mut self, position: &Position) -> bool {
        match self.nearest_node(position) {
            Some(index) => {
                self.nodes[index].room_type = RoomType::DangerZone;
                true
            }
            None => false,
        }
    }

    fn nearest_node(&self, position: &Position) -> Option<usize> {
        self.layout
            .nearest_coords(position)
            .map(|(floor, i, j)| self.index_of(floor, i, j))
    }

    /// 危険源リストから全ノードの危険度を再計算
    ///
    /// 全ノードを0にリセットした後、各危険源について同じ階の最寄りノードを中心に
    /// 半径 `DANGER_RADIUS_M` 以内へ線形減衰 `level × (1 − 距離/半径)` で危険度を与えます。
    /// 重複する領域では合計せず最大値を採用します。
    ///
    /// # 引数
    ///
    /// * `sources` - (危険源の位置, 強度) のリスト
    pub fn update_danger(&mut self, sources: &[(Position, f64)]) {
        for node in &mut self.nodes {
            node.danger_level = 0.0;
        }

        for (source_position, level) in sources {
            let Some(center) = self.nearest_node(source_position) else {
                debug!("建物外の階の危険源を無視: {}", source_position);
                continue;
            };
            self.raise_danger_around(center, level.clamp(0.0, 1.0), DANGER_RADIUS_M);
        }
    }

    fn raise_danger_around(&mut self, center: usize, level: f64, radius: f64) {
        let center_position = self.nodes[center].position;
        let per_floor = self.layout.grid_size * self.layout.grid_size;
        let start = center_position.floor() as usize * per_floor;

        for node in &mut self.nodes[start..start + per_floor] {
            let distance = node.position.distance_to(&center_position);
            if distance <= radius {
                let factor = 1.0 - distance / radius;
                node.danger_level = node.danger_level.max(level * factor);
            }
        }
    }

    fn edge_cost(&self, edge: &NavEdge, avoid_danger: bool) -> f64 {
        if avoid_danger {
            let danger = self.nodes[edge.to].danger_level;
            edge.weight * (1.0 + danger * DANGER_WEIGHT_FACTOR)
        } else {
            edge.weight
        }
    }

    /// A* による最短経路探索
    ///
    /// ヒューリスティックはユークリッド距離です（全エッジのコストが端点間の
    /// ユークリッド距離以上なので許容的）。
    ///
    /// # 引数
    ///
    /// * `start` - 出発位置（格子点）
    /// * `goal` - 目標位置（格子点）
    /// * `avoid_danger` - 到着側ノードの危険度でコストを割り増すか
    ///
    /// # 戻り値
    ///
    /// 出発位置と目標位置を含む経路。格子点でない場合や到達不能の場合はNone
    pub fn find_path(
        &self,
        start: &Position,
        goal: &Position,
        avoid_danger: bool,
    ) -> Option<Vec<Position>> {
        let start_index = self.node_index(start)?;
        let goal_index = self.node_index(goal)?;

        if start_index == goal_index {
            return Some(vec![self.nodes[start_index].position]);
        }

        let goal_position = self.nodes[goal_index].position;
        let heuristic = |index: usize| self.nodes[index].position.distance_to(&goal_position);

        let count = self.nodes.len();
        let mut cost_so_far = vec![f64::INFINITY; count];
        let mut came_from: Vec<Option<usize>> = vec![None; count];
        let mut closed = vec![false; count];
        let mut frontier = BinaryHeap::new();
        let mut sequence = 0u64;

        cost_so_far[start_index] = 0.0;
        frontier.push(OpenEntry {
            estimate: heuristic(start_index),
            sequence,
            node: start_index,
        });

        while let Some(OpenEntry { node: current, .. }) = frontier.pop() {
            if current == goal_index {
                return Some(self.reconstruct(&came_from, current));
            }
            if closed[current] {
                continue;
            }
            closed[current] = true;

            for edge in &self.adjacency[current] {
                if closed[edge.to] {
                    continue;
                }
                let new_cost = cost_so_far[current] + self.edge_cost(edge, avoid_danger);
                if new_cost < cost_so_far[edge.to] {
                    cost_so_far[edge.to] = new_cost;
                    came_from[edge.to] = Some(current);
                    sequence += 1;
                    frontier.push(OpenEntry {
                        estimate: new_cost + heuristic(edge.to),
                        sequence,
                        node: edge.to,
                    });
                }
            }
        }

        None
    }

    fn reconstruct(&self, came_from: &[Option<usize>], goal: usize) -> Vec<Position> {
        let mut path = vec![self.nodes[goal].position];
        let mut node = goal;
        while let Some(previous) = came_from[node] {
            path.push(self.nodes[previous].position);
            node = previous;
        }
        path.reverse();
        path
    }

    /// 経路の総コスト（隣接していない区間があれば無限大）
    pub fn path_cost(&self, path: &[Position], avoid_danger: bool) -> f64 {
        let mut total = 0.0;
        for pair in path.windows(2) {
            let (Some(from), Some(to)) = (self.node_index(&pair[0]), self.node_index(&pair[1]))
            else {
                return f64::INFINITY;
            };
            match self.adjacency[from].iter().find(|e| e.to == to) {
                Some(edge) => total += self.edge_cost(edge, avoid_danger),
                None => return f64::INFINITY,
            }
        }
        total
    }

    /// 経路上ノードの平均危険度
    ///
    /// 空の経路は「有効な経路なし」を表す無限大を返します。
    pub fn path_danger(&self, path: &[Position]) -> f64 {
        if path.is_empty() {
            return f64::INFINITY;
        }
        let total: f64 = path.iter().map(|p| self.danger_at(p)).sum();
        total / path.len() as f64
    }
}

/// A* のオープンリスト要素（推定コスト最小・挿入順が先のものを優先）
#[derive(Debug, Clone, Copy)]
struct OpenEntry {
    estimate: f64,
    sequence: u64,
    node: usize,
}

impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .estimate
            .total_cmp(&self.estimate)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for OpenEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OpenEntry {}
