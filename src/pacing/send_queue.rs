/*
 * Copyright (C) 2021 Evtech Solutions, Ltd., dba 3D-P
 * Copyright (C) 2021 Neil Tallim <neiltallim@3d-p.com>
 *
 * This file is part of rpacer.
 *
 * rpacer is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * rpacer is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with rpacer.  If not, see <https://www.gnu.org/licenses/>.
 */

/// a strict "comes before" relation used to order a [`SendQueue`]
pub trait Compare<T> {
    fn less(&self, a: &T, b: &T) -> bool;
}

/// the natural ordering of `T`, smallest first
#[derive(Clone, Copy, Debug, Default)]
pub struct Ascending;

impl<T: Ord> Compare<T> for Ascending {
    fn less(&self, a: &T, b: &T) -> bool {
        a < b
    }
}

impl<T, F: Fn(&T, &T) -> bool> Compare<T> for F {
    fn less(&self, a: &T, b: &T) -> bool {
        self(a, b)
    }
}

/// an array-backed binary min-heap
///
/// Elements are moved around by value on every sift, so they should be small.
#[derive(Clone, Debug)]
pub struct SendQueue<T, C = Ascending> {
    elems: Vec<T>,
    cmp: C,
}

impl<T: Ord> SendQueue<T> {
    pub fn new(elems: Vec<T>) -> SendQueue<T> {
        SendQueue::with_comparator(elems, Ascending)
    }
}

impl<T, C: Compare<T>> SendQueue<T, C> {
    pub fn with_comparator(elems: Vec<T>, cmp: C) -> SendQueue<T, C> {
        let mut queue = SendQueue { elems, cmp };
        for idx in (0..queue.elems.len() / 2).rev() {
            queue.sift_down(idx);
        }
        queue
    }

    pub fn len(&self) -> usize {
        self.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    pub fn peek(&self) -> Option<&T> {
        self.elems.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.elems.iter()
    }

    pub fn push(&mut self, elem: T) {
        self.elems.push(elem);
        self.sift_up(self.elems.len() - 1);
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.elems.is_empty() {
            return None;
        }
        let last = self.elems.len() - 1;
        self.elems.swap(0, last);
        let min = self.elems.pop();
        if !self.elems.is_empty() {
            self.sift_down(0);
        }
        min
    }

    /// removes the minimum and inserts `elem` in one pass, returning the old minimum
    ///
    /// When `elem` still sorts ahead of both children of the root it simply takes
    /// the root's place; otherwise it is sifted down like any other root
    /// replacement. On an empty queue this behaves like `push`.
    pub fn replace_min(&mut self, elem: T) -> Option<T> {
        if self.elems.is_empty() {
            self.elems.push(elem);
            return None;
        }
        let old = std::mem::replace(&mut self.elems[0], elem);
        let fits_in_place = self
            .elems
            .iter()
            .skip(1)
            .take(2)
            .all(|child| !self.cmp.less(child, &self.elems[0]));
        if !fits_in_place {
            self.sift_down(0);
        }
        Some(old)
    }

    /// whether every parent sorts no later than its children
    pub fn is_heap(&self) -> bool {
        (1..self.elems.len()).all(|idx| !self.cmp.less(&self.elems[idx], &self.elems[(idx - 1) / 2]))
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if !self.cmp.less(&self.elems[idx], &self.elems[parent]) {
                break;
            }
            self.elems.swap(idx, parent);
            idx = parent;
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        let len = self.elems.len();
        loop {
            let left = 2 * idx + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let mut smallest = left;
            if right < len && self.cmp.less(&self.elems[right], &self.elems[left]) {
                smallest = right;
            }
            if !self.cmp.less(&self.elems[smallest], &self.elems[idx]) {
                break;
            }
            self.elems.swap(idx, smallest);
            idx = smallest;
        }
    }
}
