//! Breakline test target
//!
//! A debuggee with a known instruction stream at printable addresses. Every
//! iteration of the main loop calls `spin_step`, which loads a fixed
//! pattern into rax and then walks a three-nop sled at the `spin_mark`
//! label. Scenario tests plant breakpoints on the mov (via `spin`) or on
//! the individual nops (via `mark`, `mark+1`, `mark+2`).

use clap::Parser;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "breakline-test-target")]
#[command(about = "Controlled debuggee for breakpoint scenario tests")]
#[command(version)]
struct Args {
    /// Extra worker threads to spawn (a moving thread population)
    #[arg(long, default_value_t = 2)]
    workers: usize,

    /// Milliseconds to sleep between spin iterations
    #[arg(long, default_value_t = 10)]
    interval_ms: u64,
}

/// Value `spin_step` loads into rax on every iteration.
pub const SPIN_PATTERN: u64 = 0x1111_1111_1111_1111;

static TICKS: AtomicU64 = AtomicU64::new(0);

#[cfg(target_arch = "x86_64")]
mod stream {
    // spin_step:  mov rax, SPIN_PATTERN
    // spin_mark:  nop
    //             nop
    //             nop
    //             ret
    std::arch::global_asm!(
        ".global spin_step",
        ".global spin_mark",
        "spin_step:",
        "    mov rax, 0x1111111111111111",
        "spin_mark:",
        "    nop",
        "    nop",
        "    nop",
        "    ret",
    );

    extern "C" {
        pub fn spin_step() -> u64;
        pub fn spin_mark();
    }

    pub fn spin_address() -> u64 {
        spin_step as usize as u64
    }

    pub fn mark_address() -> u64 {
        spin_mark as usize as u64
    }

    pub fn step() -> u64 {
        unsafe { spin_step() }
    }
}

#[cfg(not(target_arch = "x86_64"))]
mod stream {
    // The scenario suite only runs on x86_64; elsewhere the target still
    // builds so workspace-wide checks pass.
    pub fn spin_address() -> u64 {
        0
    }

    pub fn mark_address() -> u64 {
        0
    }

    pub fn step() -> u64 {
        super::SPIN_PATTERN
    }
}

fn main() {
    let args = Args::parse();

    for _ in 0..args.workers {
        std::thread::spawn(|| loop {
            std::thread::sleep(Duration::from_millis(50));
            TICKS.fetch_add(1, Ordering::SeqCst);
        });
    }

    // The harness parses this line to locate the instruction stream.
    println!(
        "ready pid={} spin={:#x} mark={:#x}",
        std::process::id(),
        stream::spin_address(),
        stream::mark_address()
    );
    let _ = io::stdout().flush();

    loop {
        // Handlers may rewrite rax mid-stream, so the return value is
        // deliberately unchecked here.
        let _ = stream::step();
        if args.interval_ms > 0 {
            std::thread::sleep(Duration::from_millis(args.interval_ms));
        }
    }
}
