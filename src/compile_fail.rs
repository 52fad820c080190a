//! Contains a set of compile failure doctests.

// -----------------------------------------------------------------------------
// Ensures loop bodies are shared between threads only if they are `Sync`.

/** ```compile_fail,E0277

use std::cell::Cell;
use parloop::ThreadPool;

static THREAD_POOL: ThreadPool = ThreadPool::new();

let count = Cell::new(0);
THREAD_POOL.for_each(0..10, |_| count.set(count.get() + 1)); //~ ERROR

``` */
mod nonsync_loop_body {}

/** ```compile_fail,E0277

use std::cell::Cell;
use parloop::ThreadPool;

static THREAD_POOL: ThreadPool = ThreadPool::new();

let calls = Cell::new(0);
THREAD_POOL.reduce_with(0..10, |i| i, |a, b| { calls.set(calls.get() + 1); a + b }); //~ ERROR

``` */
mod nonsync_combine {}

// -----------------------------------------------------------------------------
// Ensures loop bodies can not mutate their captures without synchronization.

/** ```compile_fail

use parloop::ThreadPool;

static THREAD_POOL: ThreadPool = ThreadPool::new();

let mut visited = Vec::new();
THREAD_POOL.for_each(0..10, |i| visited.push(i)); //~ ERROR

``` */
mod mutating_loop_body {}

// -----------------------------------------------------------------------------
// Ensures reduced values can move between threads.

/** ```compile_fail,E0277

use std::rc::Rc;
use parloop::ThreadPool;

static THREAD_POOL: ThreadPool = ThreadPool::new();

THREAD_POOL.reduce_with(0..10, |i| Rc::new(i), |a, b| Rc::new(*a + *b)); //~ ERROR

``` */
mod nonsend_reduce_value {}

// -----------------------------------------------------------------------------
// Ensures non-send data cannot be returned by join.

/** ```compile_fail,E0277

use std::rc::Rc;
use parloop::ThreadPool;

static THREAD_POOL: ThreadPool = ThreadPool::new();

THREAD_POOL.join(|_| Rc::new(22), |_| ()); //~ ERROR

``` */
mod nonsend_left_join {}

/** ```compile_fail,E0277

use std::rc::Rc;
use parloop::ThreadPool;

static THREAD_POOL: ThreadPool = ThreadPool::new();

THREAD_POOL.join(|_| (), |_| Rc::new(23)); //~ ERROR

``` */
mod nonsend_right_join {}

// -----------------------------------------------------------------------------
// Ensures the two branches of a join can not mutably borrow the same data.

/** ```compile_fail,E0524

use parloop::ThreadPool;

static THREAD_POOL: ThreadPool = ThreadPool::new();

fn fill(v: &mut [i64]) {
    if v.len() <= 1 {
        return;
    }

    let mid = v.len() / 2;
    let (lo, _hi) = v.split_at_mut(mid);
    THREAD_POOL.join(|_| fill(lo), |_| fill(lo)); //~ ERROR
}

fn main() { }

``` */
mod split_race {}
