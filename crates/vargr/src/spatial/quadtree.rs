//! # Loose Quadtree
//!
//! A region quadtree where each element is stored in exactly one leaf, chosen
//! by the element's center, while every node's bounds grow to the union of
//! the rectangles stored beneath it. Queries prune on those loose bounds, so
//! an element that straddles a split line is still found from the one leaf
//! that holds it.
//!
//! ```text
//! nodes:    [root][c0 c1 c2 c3][c0 c1 c2 c3] ...   children come in blocks of 4
//! Node { first, count }:
//!   count >= 0  → leaf, `first` heads a linked list of element links
//!   count == -1 → branch, `first` is the index of its first child
//! ```
//!
//! Elements, links, and node blocks are all recycled through free lists, so a
//! steady stream of inserts and erases does not grow the arrays. Erase never
//! shrinks node bounds or merges nodes; [`LooseQuadtree::cleanup`] does both
//! and is meant to run periodically rather than after every change.

use crate::math::{Rect, Vec2};

const NIL: i32 = -1;
const BRANCH: i32 = -1;

/// Stable handle to an element. Goes stale once the element is erased.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementHandle {
    index: u32,
    generation: u32,
}

struct Entry<T> {
    payload: T,
    rect: Rect,
}

struct ElementSlot<T> {
    entry: Option<Entry<T>>,
    generation: u32,
}

#[derive(Clone, Copy)]
struct Link {
    element: u32,
    next: i32,
}

#[derive(Clone, Copy)]
struct Node {
    first: i32,
    count: i32,
    bounds: Rect,
}

impl Node {
    const EMPTY_LEAF: Node = Node {
        first: NIL,
        count: 0,
        bounds: Rect::EMPTY,
    };

    fn is_branch(&self) -> bool {
        self.count == BRANCH
    }
}

/// Geometric cell of a node, derived on the way down from the root.
#[derive(Clone, Copy)]
struct Cell {
    center: Vec2,
    half: Vec2,
    depth: u32,
}

impl Cell {
    fn quadrant(&self, point: Vec2) -> usize {
        usize::from(point.x >= self.center.x) + 2 * usize::from(point.y >= self.center.y)
    }

    fn child(&self, quadrant: usize) -> Cell {
        let half = self.half * 0.5;
        let sign = Vec2::new(
            if quadrant & 1 == 0 { -1.0 } else { 1.0 },
            if quadrant & 2 == 0 { -1.0 } else { 1.0 },
        );
        Cell {
            center: self.center + sign * half,
            half,
            depth: self.depth + 1,
        }
    }
}

/// Occupancy figures for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct QuadtreeStats {
    pub elements: usize,
    pub nodes: usize,
    pub leaves: usize,
    pub deepest_leaf: u32,
    pub fullest_leaf: usize,
}

/// Loose quadtree over payloads of type `T`.
pub struct LooseQuadtree<T> {
    bounds: Rect,
    max_depth: u32,
    max_elements: usize,
    elements: Vec<ElementSlot<T>>,
    free_elements: Vec<u32>,
    links: Vec<Link>,
    free_link: i32,
    nodes: Vec<Node>,
    free_node: i32,
    free_blocks: usize,
    len: usize,
}

impl<T> LooseQuadtree<T> {
    /// `bounds` is the root cell. Leaves split once they hold more than
    /// `max_elements` and sit above `max_depth`; a `max_depth` of 0 keeps a
    /// single root leaf. Elements outside `bounds` are still accepted.
    pub fn new(bounds: Rect, max_depth: u32, max_elements: usize) -> Self {
        assert!(
            !bounds.is_empty(),
            "LooseQuadtree::new: root bounds {:?} are empty",
            bounds
        );
        Self {
            bounds,
            max_depth,
            max_elements: max_elements.max(1),
            elements: Vec::new(),
            free_elements: Vec::new(),
            links: Vec::new(),
            free_link: NIL,
            nodes: vec![Node::EMPTY_LEAF],
            free_node: NIL,
            free_blocks: 0,
            len: 0,
        }
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub fn max_elements(&self) -> usize {
        self.max_elements
    }

    /// Number of live elements.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Nodes currently in use (freed child blocks excluded).
    pub fn node_count(&self) -> usize {
        self.nodes.len() - 4 * self.free_blocks
    }

    fn root_cell(&self) -> Cell {
        Cell {
            center: self.bounds.center(),
            half: self.bounds.half_extents(),
            depth: 0,
        }
    }

    // ── Insert / Erase ───────────────────────────────────────────────

    pub fn insert(&mut self, payload: T, rect: Rect) -> ElementHandle {
        let handle = self.alloc_element(payload, rect);
        let center = rect.center();

        let mut node = 0;
        let mut cell = self.root_cell();
        loop {
            let n = &mut self.nodes[node];
            n.bounds = n.bounds.union(&rect);
            if !n.is_branch() {
                break;
            }
            let q = cell.quadrant(center);
            node = n.first as usize + q;
            cell = cell.child(q);
        }

        self.push_link(node, handle.index);
        if self.nodes[node].count as usize > self.max_elements && cell.depth < self.max_depth {
            self.split(node, cell);
        }
        handle
    }

    /// Remove an element. Returns `false` for a stale handle.
    pub fn erase(&mut self, handle: ElementHandle) -> bool {
        self.remove(handle).is_some()
    }

    /// Remove an element and return its payload. `None` for a stale handle.
    pub fn remove(&mut self, handle: ElementHandle) -> Option<T> {
        let rect = self.get(handle)?.1;
        let center = rect.center();

        let mut node = 0;
        let mut cell = self.root_cell();
        while self.nodes[node].is_branch() {
            let q = cell.quadrant(center);
            node = self.nodes[node].first as usize + q;
            cell = cell.child(q);
        }

        if !self.unlink(node, handle.index) {
            log::warn!(
                "quadtree element {:?} not found in its leaf; index is inconsistent",
                handle
            );
        }

        let slot = &mut self.elements[handle.index as usize];
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_elements.push(handle.index);
        self.len -= 1;
        Some(entry.payload)
    }

    /// Payload and rectangle of a live element.
    pub fn get(&self, handle: ElementHandle) -> Option<(&T, Rect)> {
        let slot = self.elements.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.entry.as_ref().map(|e| (&e.payload, e.rect))
    }

    pub fn contains(&self, handle: ElementHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Remove every element. Outstanding handles become stale.
    pub fn clear(&mut self) {
        for (index, slot) in self.elements.iter_mut().enumerate() {
            if slot.entry.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free_elements.push(index as u32);
            }
        }
        self.links.clear();
        self.free_link = NIL;
        self.nodes.clear();
        self.nodes.push(Node::EMPTY_LEAF);
        self.free_node = NIL;
        self.free_blocks = 0;
        self.len = 0;
    }

    fn alloc_element(&mut self, payload: T, rect: Rect) -> ElementHandle {
        let entry = Some(Entry { payload, rect });
        self.len += 1;
        if let Some(index) = self.free_elements.pop() {
            let slot = &mut self.elements[index as usize];
            slot.entry = entry;
            return ElementHandle {
                index,
                generation: slot.generation,
            };
        }
        let index = u32::try_from(self.elements.len())
            .unwrap_or_else(|_| panic!("quadtree element space exhausted"));
        self.elements.push(ElementSlot {
            entry,
            generation: 0,
        });
        ElementHandle {
            index,
            generation: 0,
        }
    }

    fn element_rect(&self, element: u32) -> Rect {
        self.elements[element as usize]
            .entry
            .as_ref()
            .map(|e| e.rect)
            .unwrap_or(Rect::EMPTY)
    }

    fn push_link(&mut self, node: usize, element: u32) {
        let link = Link {
            element,
            next: self.nodes[node].first,
        };
        let index = if self.free_link != NIL {
            let index = self.free_link;
            self.free_link = self.links[index as usize].next;
            self.links[index as usize] = link;
            index
        } else {
            self.links.push(link);
            (self.links.len() - 1) as i32
        };
        self.nodes[node].first = index;
        self.nodes[node].count += 1;
    }

    /// Unlink `element` from leaf `node`'s list, recycling the link.
    fn unlink(&mut self, node: usize, element: u32) -> bool {
        let mut prev = NIL;
        let mut current = self.nodes[node].first;
        while current != NIL {
            let link = self.links[current as usize];
            if link.element == element {
                if prev == NIL {
                    self.nodes[node].first = link.next;
                } else {
                    self.links[prev as usize].next = link.next;
                }
                self.links[current as usize].next = self.free_link;
                self.free_link = current;
                self.nodes[node].count -= 1;
                return true;
            }
            prev = current;
            current = link.next;
        }
        false
    }

    /// Turn leaf `node` into a branch and push its elements one level down.
    /// Any child left holding more than `max_elements` above `max_depth` is
    /// split in turn, so coincident elements sink until they fit.
    fn split(&mut self, node: usize, cell: Cell) {
        let mut pending = vec![(node, cell)];
        while let Some((node, cell)) = pending.pop() {
            let mut elements = Vec::with_capacity(self.nodes[node].count as usize);
            let mut current = self.nodes[node].first;
            while current != NIL {
                let link = self.links[current as usize];
                elements.push(link.element);
                self.links[current as usize].next = self.free_link;
                self.free_link = current;
                current = link.next;
            }

            let block = self.alloc_block();
            self.nodes[node].first = block as i32;
            self.nodes[node].count = BRANCH;

            for element in elements {
                let rect = self.element_rect(element);
                let child = block + cell.quadrant(rect.center());
                self.nodes[child].bounds = self.nodes[child].bounds.union(&rect);
                self.push_link(child, element);
            }

            for q in 0..4 {
                let child_cell = cell.child(q);
                if self.nodes[block + q].count as usize > self.max_elements
                    && child_cell.depth < self.max_depth
                {
                    pending.push((block + q, child_cell));
                }
            }
        }
    }

    fn alloc_block(&mut self) -> usize {
        if self.free_node != NIL {
            let block = self.free_node as usize;
            self.free_node = self.nodes[block].first;
            self.free_blocks -= 1;
            self.nodes[block..block + 4].fill(Node::EMPTY_LEAF);
            block
        } else {
            let block = self.nodes.len();
            self.nodes.extend([Node::EMPTY_LEAF; 4]);
            block
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Visit every element whose rectangle overlaps `area` (edges inclusive).
    pub fn for_each_in_rect(&self, area: Rect, mut f: impl FnMut(ElementHandle, &T, Rect)) {
        self.visit(|bounds| bounds.overlaps(&area), |rect| rect.overlaps(&area), &mut f);
    }

    /// Visit every element whose rectangle contains `point`.
    pub fn for_each_at_point(&self, point: Vec2, mut f: impl FnMut(ElementHandle, &T, Rect)) {
        self.visit(
            |bounds| bounds.contains_point(point),
            |rect| rect.contains_point(point),
            &mut f,
        );
    }

    fn visit(
        &self,
        enter: impl Fn(&Rect) -> bool,
        accept: impl Fn(&Rect) -> bool,
        f: &mut impl FnMut(ElementHandle, &T, Rect),
    ) {
        let mut stack = vec![0usize];
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            if !enter(&node.bounds) {
                continue;
            }
            if node.is_branch() {
                let first = node.first as usize;
                stack.extend(first..first + 4);
                continue;
            }
            let mut current = node.first;
            while current != NIL {
                let link = self.links[current as usize];
                let slot = &self.elements[link.element as usize];
                if let Some(entry) = &slot.entry {
                    if accept(&entry.rect) {
                        let handle = ElementHandle {
                            index: link.element,
                            generation: slot.generation,
                        };
                        f(handle, &entry.payload, entry.rect);
                    }
                }
                current = link.next;
            }
        }
    }

    /// Collect the handles of every element overlapping `area`.
    pub fn query_handles(&self, area: Rect) -> Vec<ElementHandle> {
        let mut out = Vec::new();
        self.for_each_in_rect(area, |handle, _, _| out.push(handle));
        out
    }

    // ── Maintenance ──────────────────────────────────────────────────

    /// Collapse branches whose four children are empty leaves and shrink
    /// every node's bounds back to the union of its elements.
    pub fn cleanup(&mut self) {
        let before = self.node_count();
        self.cleanup_node(0);
        log::trace!(
            "quadtree cleanup: {} -> {} nodes, {} elements",
            before,
            self.node_count(),
            self.len
        );
    }

    fn cleanup_node(&mut self, index: usize) -> Rect {
        let node = self.nodes[index];
        if !node.is_branch() {
            let mut bounds = Rect::EMPTY;
            let mut current = node.first;
            while current != NIL {
                let link = self.links[current as usize];
                bounds = bounds.union(&self.element_rect(link.element));
                current = link.next;
            }
            self.nodes[index].bounds = bounds;
            return bounds;
        }

        let first = node.first as usize;
        let mut bounds = Rect::EMPTY;
        let mut all_empty = true;
        for child in first..first + 4 {
            bounds = bounds.union(&self.cleanup_node(child));
            if self.nodes[child].count != 0 {
                all_empty = false;
            }
        }

        if all_empty {
            self.nodes[first].first = self.free_node;
            self.free_node = first as i32;
            self.free_blocks += 1;
            self.nodes[index] = Node::EMPTY_LEAF;
            return Rect::EMPTY;
        }
        self.nodes[index].bounds = bounds;
        bounds
    }

    /// Visit every leaf with its depth, loose bounds and element count.
    pub fn for_each_leaf(&self, mut f: impl FnMut(u32, Rect, usize)) {
        let mut stack = vec![(0usize, 0u32)];
        while let Some((index, depth)) = stack.pop() {
            let node = &self.nodes[index];
            if node.is_branch() {
                let first = node.first as usize;
                stack.extend((first..first + 4).map(|c| (c, depth + 1)));
            } else {
                f(depth, node.bounds, node.count as usize);
            }
        }
    }

    /// Summarize occupancy.
    pub fn stats(&self) -> QuadtreeStats {
        let mut stats = QuadtreeStats {
            elements: self.len,
            nodes: self.node_count(),
            ..QuadtreeStats::default()
        };
        self.for_each_leaf(|depth, _, count| {
            stats.leaves += 1;
            stats.deepest_leaf = stats.deepest_leaf.max(depth);
            stats.fullest_leaf = stats.fullest_leaf.max(count);
        });
        stats
    }
}

impl<T: Clone> LooseQuadtree<T> {
    /// Payloads of every element overlapping `area`.
    pub fn query_rect(&self, area: Rect) -> Vec<T> {
        let mut out = Vec::new();
        self.for_each_in_rect(area, |_, payload, _| out.push(payload.clone()));
        out
    }

    /// Payloads of every element containing `point`.
    pub fn query_point(&self, point: Vec2) -> Vec<T> {
        let mut out = Vec::new();
        self.for_each_at_point(point, |_, payload, _| out.push(payload.clone()));
        out
    }
}
