//! Stateful standard function blocks: layouts and state-machine templates.
//!
//! Every block declares its instance layout here, authoritatively; the
//! symbol table sizes instances from these tables and invocation stores
//! inputs to the listed offsets before the template runs. Timer blocks read
//! the VM's monotonic millisecond counter via `TICK`.

use super::{BlockDef, BlockMember, Role, TemplateCaps};
use crate::error::CodegenError;
use crate::types::ElementaryType as E;

macro_rules! e {
    ($caps:expr, $($arg:tt)*) => {
        $caps.emit(&format!($($arg)*))
    };
}

macro_rules! members {
    ($(($name:expr, $ty:ident, $offset:expr, $role:ident)),* $(,)?) => {
        &[$(BlockMember {
            name: $name,
            ty: E::$ty,
            offset: $offset,
            role: Role::$role,
        }),*]
    };
}

/// All stateful block definitions, in registry order.
pub fn definitions() -> Vec<BlockDef> {
    vec![
        BlockDef {
            name: "TON",
            size: 16,
            members: members![
                ("IN", Bool, 0, Input),
                ("Q", Bool, 1, Output),
                ("_running", Bool, 2, Internal),
                ("PT", Time, 4, Input),
                ("ET", Time, 8, Output),
                ("_start", UDInt, 12, Internal),
            ],
            emit: emit_ton,
        },
        BlockDef {
            name: "TOF",
            size: 16,
            members: members![
                ("IN", Bool, 0, Input),
                ("Q", Bool, 1, Output),
                ("_running", Bool, 2, Internal),
                ("PT", Time, 4, Input),
                ("ET", Time, 8, Output),
                ("_start", UDInt, 12, Internal),
            ],
            emit: emit_tof,
        },
        BlockDef {
            name: "TP",
            size: 16,
            members: members![
                ("IN", Bool, 0, Input),
                ("Q", Bool, 1, Output),
                ("_running", Bool, 2, Internal),
                ("_prev", Bool, 3, Internal),
                ("PT", Time, 4, Input),
                ("ET", Time, 8, Output),
                ("_start", UDInt, 12, Internal),
            ],
            emit: emit_tp,
        },
        BlockDef {
            name: "CTU",
            size: 8,
            members: members![
                ("CU", Bool, 0, Input),
                ("R", Bool, 1, Input),
                ("Q", Bool, 2, Output),
                ("_prev", Bool, 3, Internal),
                ("PV", Int, 4, Input),
                ("CV", Int, 6, Output),
            ],
            emit: emit_ctu,
        },
        BlockDef {
            name: "CTD",
            size: 8,
            members: members![
                ("CD", Bool, 0, Input),
                ("LD", Bool, 1, Input),
                ("Q", Bool, 2, Output),
                ("_prev", Bool, 3, Internal),
                ("PV", Int, 4, Input),
                ("CV", Int, 6, Output),
            ],
            emit: emit_ctd,
        },
        BlockDef {
            name: "CTUD",
            size: 12,
            members: members![
                ("CU", Bool, 0, Input),
                ("CD", Bool, 1, Input),
                ("R", Bool, 2, Input),
                ("LD", Bool, 3, Input),
                ("QU", Bool, 4, Output),
                ("QD", Bool, 5, Output),
                ("_prev_up", Bool, 6, Internal),
                ("_prev_down", Bool, 7, Internal),
                ("PV", Int, 8, Input),
                ("CV", Int, 10, Output),
            ],
            emit: emit_ctud,
        },
        BlockDef {
            name: "R_TRIG",
            size: 4,
            members: members![
                ("CLK", Bool, 0, Input),
                ("Q", Bool, 1, Output),
                ("_prev", Bool, 2, Internal),
            ],
            emit: emit_r_trig,
        },
        BlockDef {
            name: "F_TRIG",
            size: 4,
            members: members![
                ("CLK", Bool, 0, Input),
                ("Q", Bool, 1, Output),
                ("_prev", Bool, 2, Internal),
            ],
            emit: emit_f_trig,
        },
        BlockDef {
            name: "SR",
            size: 4,
            members: members![
                ("S1", Bool, 0, Input),
                ("R", Bool, 1, Input),
                ("Q1", Bool, 2, Output),
            ],
            emit: emit_sr,
        },
        BlockDef {
            name: "RS",
            size: 4,
            members: members![
                ("S", Bool, 0, Input),
                ("R1", Bool, 1, Input),
                ("Q1", Bool, 2, Output),
            ],
            emit: emit_rs,
        },
        BlockDef {
            name: "HYSTERESIS",
            size: 16,
            members: members![
                ("IN", Real, 0, Input),
                ("HIGH", Real, 4, Input),
                ("LOW", Real, 8, Input),
                ("Q", Bool, 12, Output),
            ],
            emit: emit_hysteresis,
        },
        BlockDef {
            name: "PID",
            size: 48,
            members: members![
                ("SP", Real, 0, Input),
                ("PV", Real, 4, Input),
                ("KP", Real, 8, Input),
                ("KI", Real, 12, Input),
                ("KD", Real, 16, Input),
                ("DT", Real, 20, Input),
                ("OUT_MIN", Real, 24, Input),
                ("OUT_MAX", Real, 28, Input),
                ("OUT", Real, 32, Output),
                ("_integral", Real, 36, Internal),
                ("_prev_err", Real, 40, Internal),
                ("_initialized", Bool, 44, Internal),
            ],
            emit: emit_pid,
        },
        // FIFO/LIFO carry a 16-entry 4-byte buffer at offset 28/20 (inside
        // the declared size but not addressable as a member).
        BlockDef {
            name: "FIFO",
            size: 96,
            members: members![
                ("IN", DInt, 0, Input),
                ("PUSH", Bool, 4, Input),
                ("POP", Bool, 5, Input),
                ("RESET", Bool, 6, Input),
                ("_prev_push", Bool, 7, Internal),
                ("OUT", DInt, 8, Output),
                ("EMPTY", Bool, 12, Output),
                ("FULL", Bool, 13, Output),
                ("_prev_pop", Bool, 14, Internal),
                ("_head", UDInt, 16, Internal),
                ("_tail", UDInt, 20, Internal),
                ("_count", UDInt, 24, Internal),
            ],
            emit: emit_fifo,
        },
        BlockDef {
            name: "LIFO",
            size: 96,
            members: members![
                ("IN", DInt, 0, Input),
                ("PUSH", Bool, 4, Input),
                ("POP", Bool, 5, Input),
                ("RESET", Bool, 6, Input),
                ("_prev_push", Bool, 7, Internal),
                ("OUT", DInt, 8, Output),
                ("EMPTY", Bool, 12, Output),
                ("FULL", Bool, 13, Output),
                ("_prev_pop", Bool, 14, Internal),
                ("_count", UDInt, 16, Internal),
            ],
            emit: emit_lifo,
        },
    ]
}

/// Ring/stack capacity of FIFO and LIFO.
const BUFFER_CAPACITY: i64 = 16;

/// Leave `1` on the stack when `member` had a rising edge against the
/// stored previous value at `prev`.
fn emit_rising_edge(caps: &mut TemplateCaps, member: u32, prev: u32) {
    e!(caps, "LOAD8 {}", member);
    e!(caps, "LOAD8 {}", prev);
    e!(caps, "NOT");
    e!(caps, "PUSH8 1");
    e!(caps, "AND");
    e!(caps, "AND");
}

fn emit_ton(caps: &mut TemplateCaps, base: u32, instance: &str) -> Result<(), CodegenError> {
    let l_off = caps.label("ton_off");
    let l_run = caps.label("ton_run");
    let l_end = caps.label("ton_end");
    e!(caps, "; TON {}", instance);
    e!(caps, "LOAD8 {}", base); // IN
    e!(caps, "JZ {}", l_off);
    e!(caps, "LOAD8 {}", base + 2); // _running
    e!(caps, "JNZ {}", l_run);
    // IN just went high: capture the start tick, clear ET and Q
    e!(caps, "TICK");
    e!(caps, "STORE32 {}", base + 12);
    e!(caps, "PUSH8 1");
    e!(caps, "STORE8 {}", base + 2);
    e!(caps, "PUSH8 0");
    e!(caps, "STORE32 {}", base + 8);
    e!(caps, "PUSH8 0");
    e!(caps, "STORE8 {}", base + 1);
    e!(caps, "JMP {}", l_end);
    caps.emit_label(&l_run);
    e!(caps, "TICK");
    e!(caps, "LOAD32 {}", base + 12);
    e!(caps, "SUB");
    e!(caps, "STORE32 {}", base + 8); // ET := now - _start
    e!(caps, "LOAD32 {}", base + 8);
    e!(caps, "LOAD32 {}", base + 4);
    e!(caps, "GE");
    e!(caps, "JZ {}", l_end);
    e!(caps, "PUSH8 1");
    e!(caps, "STORE8 {}", base + 1); // Q := 1 once ET >= PT
    e!(caps, "JMP {}", l_end);
    caps.emit_label(&l_off);
    e!(caps, "PUSH8 0");
    e!(caps, "STORE8 {}", base + 2);
    e!(caps, "PUSH8 0");
    e!(caps, "STORE32 {}", base + 8);
    e!(caps, "PUSH8 0");
    e!(caps, "STORE8 {}", base + 1);
    caps.emit_label(&l_end);
    Ok(())
}

fn emit_tof(caps: &mut TemplateCaps, base: u32, instance: &str) -> Result<(), CodegenError> {
    let l_falling = caps.label("tof_fall");
    let l_tick = caps.label("tof_tick");
    let l_end = caps.label("tof_end");
    e!(caps, "; TOF {}", instance);
    e!(caps, "LOAD8 {}", base);
    e!(caps, "JZ {}", l_falling);
    // IN high: output follows immediately, timer disarmed
    e!(caps, "PUSH8 1");
    e!(caps, "STORE8 {}", base + 1);
    e!(caps, "PUSH8 0");
    e!(caps, "STORE8 {}", base + 2);
    e!(caps, "PUSH8 0");
    e!(caps, "STORE32 {}", base + 8);
    e!(caps, "JMP {}", l_end);
    caps.emit_label(&l_falling);
    e!(caps, "LOAD8 {}", base + 1); // Q still high?
    e!(caps, "JZ {}", l_end);
    e!(caps, "LOAD8 {}", base + 2);
    e!(caps, "JNZ {}", l_tick);
    e!(caps, "TICK");
    e!(caps, "STORE32 {}", base + 12);
    e!(caps, "PUSH8 1");
    e!(caps, "STORE8 {}", base + 2);
    caps.emit_label(&l_tick);
    e!(caps, "TICK");
    e!(caps, "LOAD32 {}", base + 12);
    e!(caps, "SUB");
    e!(caps, "STORE32 {}", base + 8);
    e!(caps, "LOAD32 {}", base + 8);
    e!(caps, "LOAD32 {}", base + 4);
    e!(caps, "GE");
    e!(caps, "JZ {}", l_end);
    e!(caps, "PUSH8 0");
    e!(caps, "STORE8 {}", base + 1);
    e!(caps, "PUSH8 0");
    e!(caps, "STORE8 {}", base + 2);
    caps.emit_label(&l_end);
    Ok(())
}

fn emit_tp(caps: &mut TemplateCaps, base: u32, instance: &str) -> Result<(), CodegenError> {
    let l_check = caps.label("tp_check");
    let l_done = caps.label("tp_done");
    e!(caps, "; TP {}", instance);
    emit_rising_edge(caps, base, base + 3);
    e!(caps, "JZ {}", l_check);
    e!(caps, "LOAD8 {}", base + 2);
    e!(caps, "JNZ {}", l_check); // pulse already running, edge ignored
    e!(caps, "TICK");
    e!(caps, "STORE32 {}", base + 12);
    e!(caps, "PUSH8 1");
    e!(caps, "STORE8 {}", base + 2);
    e!(caps, "PUSH8 1");
    e!(caps, "STORE8 {}", base + 1);
    e!(caps, "PUSH8 0");
    e!(caps, "STORE32 {}", base + 8);
    caps.emit_label(&l_check);
    e!(caps, "LOAD8 {}", base + 2);
    e!(caps, "JZ {}", l_done);
    e!(caps, "TICK");
    e!(caps, "LOAD32 {}", base + 12);
    e!(caps, "SUB");
    e!(caps, "STORE32 {}", base + 8);
    e!(caps, "LOAD32 {}", base + 8);
    e!(caps, "LOAD32 {}", base + 4);
    e!(caps, "GE");
    e!(caps, "JZ {}", l_done);
    e!(caps, "PUSH8 0");
    e!(caps, "STORE8 {}", base + 1);
    e!(caps, "PUSH8 0");
    e!(caps, "STORE8 {}", base + 2);
    caps.emit_label(&l_done);
    e!(caps, "LOAD8 {}", base);
    e!(caps, "STORE8 {}", base + 3);
    Ok(())
}

fn emit_ctu(caps: &mut TemplateCaps, base: u32, instance: &str) -> Result<(), CodegenError> {
    let l_count = caps.label("ctu_count");
    let l_q = caps.label("ctu_q");
    e!(caps, "; CTU {}", instance);
    e!(caps, "LOAD8 {}", base + 1); // R
    e!(caps, "JZ {}", l_count);
    e!(caps, "PUSH8 0");
    e!(caps, "STORE16 {}", base + 6);
    e!(caps, "JMP {}", l_q);
    caps.emit_label(&l_count);
    emit_rising_edge(caps, base, base + 3);
    e!(caps, "JZ {}", l_q);
    e!(caps, "LOAD16 {}", base + 6);
    e!(caps, "PUSH16 32767");
    e!(caps, "LT");
    e!(caps, "JZ {}", l_q); // saturate at INT max
    e!(caps, "LOAD16 {}", base + 6);
    e!(caps, "PUSH8 1");
    e!(caps, "ADD");
    e!(caps, "STORE16 {}", base + 6);
    caps.emit_label(&l_q);
    e!(caps, "LOAD16 {}", base + 6);
    e!(caps, "LOAD16 {}", base + 4);
    e!(caps, "GE");
    e!(caps, "STORE8 {}", base + 2);
    e!(caps, "LOAD8 {}", base);
    e!(caps, "STORE8 {}", base + 3);
    Ok(())
}

fn emit_ctd(caps: &mut TemplateCaps, base: u32, instance: &str) -> Result<(), CodegenError> {
    let l_count = caps.label("ctd_count");
    let l_q = caps.label("ctd_q");
    e!(caps, "; CTD {}", instance);
    e!(caps, "LOAD8 {}", base + 1); // LD
    e!(caps, "JZ {}", l_count);
    e!(caps, "LOAD16 {}", base + 4);
    e!(caps, "STORE16 {}", base + 6);
    e!(caps, "JMP {}", l_q);
    caps.emit_label(&l_count);
    emit_rising_edge(caps, base, base + 3);
    e!(caps, "JZ {}", l_q);
    e!(caps, "LOAD16 {}", base + 6);
    e!(caps, "PUSH16 -32768");
    e!(caps, "GT");
    e!(caps, "JZ {}", l_q);
    e!(caps, "LOAD16 {}", base + 6);
    e!(caps, "PUSH8 1");
    e!(caps, "SUB");
    e!(caps, "STORE16 {}", base + 6);
    caps.emit_label(&l_q);
    e!(caps, "LOAD16 {}", base + 6);
    e!(caps, "PUSH8 0");
    e!(caps, "LE");
    e!(caps, "STORE8 {}", base + 2);
    e!(caps, "LOAD8 {}", base);
    e!(caps, "STORE8 {}", base + 3);
    Ok(())
}

fn emit_ctud(caps: &mut TemplateCaps, base: u32, instance: &str) -> Result<(), CodegenError> {
    let l_load = caps.label("ctud_load");
    let l_up = caps.label("ctud_up");
    let l_down = caps.label("ctud_down");
    let l_q = caps.label("ctud_q");
    e!(caps, "; CTUD {}", instance);
    e!(caps, "LOAD8 {}", base + 2); // R dominates
    e!(caps, "JZ {}", l_load);
    e!(caps, "PUSH8 0");
    e!(caps, "STORE16 {}", base + 10);
    e!(caps, "JMP {}", l_q);
    caps.emit_label(&l_load);
    e!(caps, "LOAD8 {}", base + 3); // LD
    e!(caps, "JZ {}", l_up);
    e!(caps, "LOAD16 {}", base + 8);
    e!(caps, "STORE16 {}", base + 10);
    e!(caps, "JMP {}", l_q);
    caps.emit_label(&l_up);
    emit_rising_edge(caps, base, base + 6);
    e!(caps, "JZ {}", l_down);
    e!(caps, "LOAD16 {}", base + 10);
    e!(caps, "PUSH16 32767");
    e!(caps, "LT");
    e!(caps, "JZ {}", l_down);
    e!(caps, "LOAD16 {}", base + 10);
    e!(caps, "PUSH8 1");
    e!(caps, "ADD");
    e!(caps, "STORE16 {}", base + 10);
    caps.emit_label(&l_down);
    emit_rising_edge(caps, base + 1, base + 7);
    e!(caps, "JZ {}", l_q);
    e!(caps, "LOAD16 {}", base + 10);
    e!(caps, "PUSH16 -32768");
    e!(caps, "GT");
    e!(caps, "JZ {}", l_q);
    e!(caps, "LOAD16 {}", base + 10);
    e!(caps, "PUSH8 1");
    e!(caps, "SUB");
    e!(caps, "STORE16 {}", base + 10);
    caps.emit_label(&l_q);
    e!(caps, "LOAD16 {}", base + 10);
    e!(caps, "LOAD16 {}", base + 8);
    e!(caps, "GE");
    e!(caps, "STORE8 {}", base + 4);
    e!(caps, "LOAD16 {}", base + 10);
    e!(caps, "PUSH8 0");
    e!(caps, "LE");
    e!(caps, "STORE8 {}", base + 5);
    e!(caps, "LOAD8 {}", base);
    e!(caps, "STORE8 {}", base + 6);
    e!(caps, "LOAD8 {}", base + 1);
    e!(caps, "STORE8 {}", base + 7);
    Ok(())
}

fn emit_r_trig(caps: &mut TemplateCaps, base: u32, instance: &str) -> Result<(), CodegenError> {
    e!(caps, "; R_TRIG {}", instance);
    emit_rising_edge(caps, base, base + 2);
    e!(caps, "STORE8 {}", base + 1);
    e!(caps, "LOAD8 {}", base);
    e!(caps, "STORE8 {}", base + 2);
    Ok(())
}

fn emit_f_trig(caps: &mut TemplateCaps, base: u32, instance: &str) -> Result<(), CodegenError> {
    e!(caps, "; F_TRIG {}", instance);
    e!(caps, "LOAD8 {}", base);
    e!(caps, "NOT");
    e!(caps, "PUSH8 1");
    e!(caps, "AND");
    e!(caps, "LOAD8 {}", base + 2);
    e!(caps, "AND");
    e!(caps, "STORE8 {}", base + 1);
    e!(caps, "LOAD8 {}", base);
    e!(caps, "STORE8 {}", base + 2);
    Ok(())
}

fn emit_sr(caps: &mut TemplateCaps, base: u32, instance: &str) -> Result<(), CodegenError> {
    // Q1 := S1 OR (Q1 AND NOT R) — set dominant
    e!(caps, "; SR {}", instance);
    e!(caps, "LOAD8 {}", base);
    e!(caps, "LOAD8 {}", base + 2);
    e!(caps, "LOAD8 {}", base + 1);
    e!(caps, "NOT");
    e!(caps, "PUSH8 1");
    e!(caps, "AND");
    e!(caps, "AND");
    e!(caps, "OR");
    e!(caps, "STORE8 {}", base + 2);
    Ok(())
}

fn emit_rs(caps: &mut TemplateCaps, base: u32, instance: &str) -> Result<(), CodegenError> {
    // Q1 := NOT R1 AND (Q1 OR S) — reset dominant
    e!(caps, "; RS {}", instance);
    e!(caps, "LOAD8 {}", base + 2);
    e!(caps, "LOAD8 {}", base);
    e!(caps, "OR");
    e!(caps, "LOAD8 {}", base + 1);
    e!(caps, "NOT");
    e!(caps, "PUSH8 1");
    e!(caps, "AND");
    e!(caps, "AND");
    e!(caps, "STORE8 {}", base + 2);
    Ok(())
}

fn emit_hysteresis(caps: &mut TemplateCaps, base: u32, instance: &str) -> Result<(), CodegenError> {
    let l_on = caps.label("hyst_on");
    let l_end = caps.label("hyst_end");
    e!(caps, "; HYSTERESIS {}", instance);
    e!(caps, "LOAD8 {}", base + 12);
    e!(caps, "JNZ {}", l_on);
    // Q=0: switch on above HIGH
    e!(caps, "LOAD32 {}", base);
    e!(caps, "LOAD32 {}", base + 4);
    e!(caps, "GTF");
    e!(caps, "JZ {}", l_end);
    e!(caps, "PUSH8 1");
    e!(caps, "STORE8 {}", base + 12);
    e!(caps, "JMP {}", l_end);
    caps.emit_label(&l_on);
    // Q=1: switch off below LOW; inside [LOW, HIGH] the state holds
    e!(caps, "LOAD32 {}", base);
    e!(caps, "LOAD32 {}", base + 8);
    e!(caps, "LTF");
    e!(caps, "JZ {}", l_end);
    e!(caps, "PUSH8 0");
    e!(caps, "STORE8 {}", base + 12);
    caps.emit_label(&l_end);
    Ok(())
}

fn emit_pid(caps: &mut TemplateCaps, base: u32, instance: &str) -> Result<(), CodegenError> {
    let l_run = caps.label("pid_run");
    let l_max_ok = caps.label("pid_max_ok");
    let l_min_ok = caps.label("pid_min_ok");
    let l_end = caps.label("pid_end");
    e!(caps, "; PID {}", instance);
    e!(caps, "LOAD8 {}", base + 44);
    e!(caps, "JNZ {}", l_run);
    // First call: seed _prev_err with the current error, clear the integral
    e!(caps, "LOAD32 {}", base);
    e!(caps, "LOAD32 {}", base + 4);
    e!(caps, "SUBF");
    e!(caps, "STORE32 {}", base + 40);
    e!(caps, "PUSH32 0");
    e!(caps, "STORE32 {}", base + 36);
    e!(caps, "PUSH8 1");
    e!(caps, "STORE8 {}", base + 44);
    e!(caps, "JMP {}", l_end);
    caps.emit_label(&l_run);
    // err := SP - PV, kept four deep for the I, D, P terms and _prev_err
    e!(caps, "LOAD32 {}", base);
    e!(caps, "LOAD32 {}", base + 4);
    e!(caps, "SUBF");
    e!(caps, "DUP");
    e!(caps, "DUP");
    e!(caps, "DUP");
    // _integral := _integral + err*DT
    e!(caps, "LOAD32 {}", base + 20);
    e!(caps, "MULF");
    e!(caps, "LOAD32 {}", base + 36);
    e!(caps, "ADDF");
    e!(caps, "STORE32 {}", base + 36);
    // derivative term KD*(err - _prev_err)/DT
    e!(caps, "LOAD32 {}", base + 40);
    e!(caps, "SUBF");
    e!(caps, "LOAD32 {}", base + 20);
    e!(caps, "DIVF");
    e!(caps, "LOAD32 {}", base + 16);
    e!(caps, "MULF");
    // OUT := KP*err + KI*_integral + d
    e!(caps, "SWAP");
    e!(caps, "LOAD32 {}", base + 8);
    e!(caps, "MULF");
    e!(caps, "LOAD32 {}", base + 12);
    e!(caps, "LOAD32 {}", base + 36);
    e!(caps, "MULF");
    e!(caps, "ADDF");
    e!(caps, "ADDF");
    // clamp to [OUT_MIN, OUT_MAX]
    e!(caps, "DUP");
    e!(caps, "LOAD32 {}", base + 28);
    e!(caps, "GTF");
    e!(caps, "JZ {}", l_max_ok);
    e!(caps, "DROP");
    e!(caps, "LOAD32 {}", base + 28);
    caps.emit_label(&l_max_ok);
    e!(caps, "DUP");
    e!(caps, "LOAD32 {}", base + 24);
    e!(caps, "LTF");
    e!(caps, "JZ {}", l_min_ok);
    e!(caps, "DROP");
    e!(caps, "LOAD32 {}", base + 24);
    caps.emit_label(&l_min_ok);
    e!(caps, "STORE32 {}", base + 32);
    e!(caps, "STORE32 {}", base + 40); // _prev_err := err
    caps.emit_label(&l_end);
    Ok(())
}

fn emit_fifo(caps: &mut TemplateCaps, base: u32, instance: &str) -> Result<(), CodegenError> {
    let l_norst = caps.label("fifo_norst");
    let l_nopush = caps.label("fifo_nopush");
    let l_nopop = caps.label("fifo_nopop");
    let buf = base + 28;
    e!(caps, "; FIFO {}", instance);
    e!(caps, "LOAD8 {}", base + 6);
    e!(caps, "JZ {}", l_norst);
    e!(caps, "PUSH8 0");
    e!(caps, "STORE32 {}", base + 16);
    e!(caps, "PUSH8 0");
    e!(caps, "STORE32 {}", base + 20);
    e!(caps, "PUSH8 0");
    e!(caps, "STORE32 {}", base + 24);
    caps.emit_label(&l_norst);
    // push on a rising edge while below capacity
    emit_rising_edge(caps, base + 4, base + 7);
    e!(caps, "JZ {}", l_nopush);
    e!(caps, "LOAD32 {}", base + 24);
    e!(caps, "PUSH8 {}", BUFFER_CAPACITY);
    e!(caps, "LT");
    e!(caps, "JZ {}", l_nopush);
    e!(caps, "LOAD32 {}", base); // value
    e!(caps, "LOAD32 {}", base + 20); // _tail
    e!(caps, "PUSH8 4");
    e!(caps, "MUL");
    e!(caps, "PUSH32 {}", buf);
    e!(caps, "ADD");
    e!(caps, "STOREIN32");
    e!(caps, "LOAD32 {}", base + 20);
    e!(caps, "PUSH8 1");
    e!(caps, "ADD");
    e!(caps, "PUSH8 {}", BUFFER_CAPACITY);
    e!(caps, "MOD");
    e!(caps, "STORE32 {}", base + 20);
    e!(caps, "LOAD32 {}", base + 24);
    e!(caps, "PUSH8 1");
    e!(caps, "ADD");
    e!(caps, "STORE32 {}", base + 24);
    caps.emit_label(&l_nopush);
    // pop on a rising edge while non-empty
    emit_rising_edge(caps, base + 5, base + 14);
    e!(caps, "JZ {}", l_nopop);
    e!(caps, "LOAD32 {}", base + 24);
    e!(caps, "PUSH8 0");
    e!(caps, "GT");
    e!(caps, "JZ {}", l_nopop);
    e!(caps, "LOAD32 {}", base + 16); // _head
    e!(caps, "PUSH8 4");
    e!(caps, "MUL");
    e!(caps, "PUSH32 {}", buf);
    e!(caps, "ADD");
    e!(caps, "LOADIN32");
    e!(caps, "STORE32 {}", base + 8);
    e!(caps, "LOAD32 {}", base + 16);
    e!(caps, "PUSH8 1");
    e!(caps, "ADD");
    e!(caps, "PUSH8 {}", BUFFER_CAPACITY);
    e!(caps, "MOD");
    e!(caps, "STORE32 {}", base + 16);
    e!(caps, "LOAD32 {}", base + 24);
    e!(caps, "PUSH8 1");
    e!(caps, "SUB");
    e!(caps, "STORE32 {}", base + 24);
    caps.emit_label(&l_nopop);
    emit_buffer_flags(caps, base);
    e!(caps, "LOAD8 {}", base + 4);
    e!(caps, "STORE8 {}", base + 7);
    e!(caps, "LOAD8 {}", base + 5);
    e!(caps, "STORE8 {}", base + 14);
    Ok(())
}

fn emit_lifo(caps: &mut TemplateCaps, base: u32, instance: &str) -> Result<(), CodegenError> {
    let l_norst = caps.label("lifo_norst");
    let l_nopush = caps.label("lifo_nopush");
    let l_nopop = caps.label("lifo_nopop");
    let buf = base + 20;
    let count = base + 16;
    e!(caps, "; LIFO {}", instance);
    e!(caps, "LOAD8 {}", base + 6);
    e!(caps, "JZ {}", l_norst);
    e!(caps, "PUSH8 0");
    e!(caps, "STORE32 {}", count);
    caps.emit_label(&l_norst);
    emit_rising_edge(caps, base + 4, base + 7);
    e!(caps, "JZ {}", l_nopush);
    e!(caps, "LOAD32 {}", count);
    e!(caps, "PUSH8 {}", BUFFER_CAPACITY);
    e!(caps, "LT");
    e!(caps, "JZ {}", l_nopush);
    e!(caps, "LOAD32 {}", base);
    e!(caps, "LOAD32 {}", count);
    e!(caps, "PUSH8 4");
    e!(caps, "MUL");
    e!(caps, "PUSH32 {}", buf);
    e!(caps, "ADD");
    e!(caps, "STOREIN32");
    e!(caps, "LOAD32 {}", count);
    e!(caps, "PUSH8 1");
    e!(caps, "ADD");
    e!(caps, "STORE32 {}", count);
    caps.emit_label(&l_nopush);
    emit_rising_edge(caps, base + 5, base + 14);
    e!(caps, "JZ {}", l_nopop);
    e!(caps, "LOAD32 {}", count);
    e!(caps, "PUSH8 0");
    e!(caps, "GT");
    e!(caps, "JZ {}", l_nopop);
    e!(caps, "LOAD32 {}", count);
    e!(caps, "PUSH8 1");
    e!(caps, "SUB");
    e!(caps, "STORE32 {}", count);
    e!(caps, "LOAD32 {}", count);
    e!(caps, "PUSH8 4");
    e!(caps, "MUL");
    e!(caps, "PUSH32 {}", buf);
    e!(caps, "ADD");
    e!(caps, "LOADIN32");
    e!(caps, "STORE32 {}", base + 8);
    caps.emit_label(&l_nopop);
    // EMPTY/FULL from the count field
    e!(caps, "LOAD32 {}", count);
    e!(caps, "PUSH8 0");
    e!(caps, "EQ");
    e!(caps, "STORE8 {}", base + 12);
    e!(caps, "LOAD32 {}", count);
    e!(caps, "PUSH8 {}", BUFFER_CAPACITY);
    e!(caps, "GE");
    e!(caps, "STORE8 {}", base + 13);
    e!(caps, "LOAD8 {}", base + 4);
    e!(caps, "STORE8 {}", base + 7);
    e!(caps, "LOAD8 {}", base + 5);
    e!(caps, "STORE8 {}", base + 14);
    Ok(())
}

fn emit_buffer_flags(caps: &mut TemplateCaps, base: u32) {
    e!(caps, "LOAD32 {}", base + 24);
    e!(caps, "PUSH8 0");
    e!(caps, "EQ");
    e!(caps, "STORE8 {}", base + 12);
    e!(caps, "LOAD32 {}", base + 24);
    e!(caps, "PUSH8 {}", BUFFER_CAPACITY);
    e!(caps, "GE");
    e!(caps, "STORE8 {}", base + 13);
}
