// This file is part of cadmium.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use cadmium_core::factory::TvStandard;

use crate::system::MegaDrive;

// Design:
//   Each device owns a virtual clock in its master-clock domain and is
//   lazily caught up to whatever timestamp a bus access demands, so the
//   system only does work when something observes a device. Every bus
//   access to a device catches that device up *before* the access is
//   serviced, which is the whole of the ordering model.

pub const M68K_CLOCK_DIVIDER: u32 = 7;
pub const Z80_CLOCK_DIVIDER: u32 = 15;
pub const MCD_M68K_CLOCK_DIVIDER: u32 = 4;
pub const FM_SAMPLE_RATE_DIVIDER: u32 = 6 * 6 * 4;
pub const PSG_SAMPLE_RATE_DIVIDER: u32 = 16;
pub const PCM_SAMPLE_RATE_DIVIDER: u32 = 384;

/// A timestamp in Mega Drive master-clock subcycles.
#[derive(Copy, Clone, PartialEq, PartialOrd)]
pub struct CycleMegaDrive(pub u32);

/// A timestamp in Mega CD master-clock subcycles.
#[derive(Copy, Clone, PartialEq, PartialOrd)]
pub struct CycleMegaCd(pub u32);

/// Multiplies a cycle count by a 32-bit 1.31 fixed-point ratio split into
/// two 16-bit halves, using only 16-bit long multiplication. Saturates at
/// the 32-bit input domain.
fn convert_cycle(cycle: u32, scale_halves: [u64; 2]) -> u32 {
    let cycle_upper = u64::from(cycle >> 16);
    let cycle_lower = u64::from(cycle & 0xffff);

    let result_upper = cycle_upper * scale_halves[0];
    let result_lower1 = cycle_upper * scale_halves[1];
    let result_lower2 = cycle_lower * scale_halves[0];

    let result = (result_upper << 1) + (result_lower1 >> 15) + (result_lower2 >> 15);

    result.min(u64::from(u32::max_value())) as u32
}

impl CycleMegaDrive {
    pub fn to_mega_cd(self, tv_standard: TvStandard) -> CycleMegaCd {
        // 0x80000000 * MCD master clock / Mega Drive master clock,
        // split into 16-bit halves.
        let scale_halves = match tv_standard {
            TvStandard::Ntsc => [0x7732, 0x1eca],
            TvStandard::Pal => [0x784b, 0x02af],
        };
        CycleMegaCd(convert_cycle(self.0, scale_halves))
    }
}

impl CycleMegaCd {
    pub fn to_mega_drive(self, tv_standard: TvStandard) -> CycleMegaDrive {
        // 0x80000000 * Mega Drive master clock / MCD master clock,
        // split into 16-bit halves.
        let scale_halves = match tv_standard {
            TvStandard::Ntsc => [0x8974, 0x5bf2],
            TvStandard::Pal => [0x8833, 0x655d],
        };
        CycleMegaDrive(convert_cycle(self.0, scale_halves))
    }
}

/// Virtual clock of a passive device.
#[derive(Default)]
pub struct SyncState {
    pub current_cycle: u32,
}

impl SyncState {
    /// Advances the device to `target_cycle / clock_divisor` and returns
    /// the number of native ticks elapsed. Targets earlier than the
    /// device's own clock are a scheduling bug in the caller.
    pub fn sync(&mut self, target_cycle: u32, clock_divisor: u32) -> u32 {
        let native_target_cycle = target_cycle / clock_divisor;

        assert!(
            native_target_cycle >= self.current_cycle,
            "failed to synchronise somewhere: device is ahead of its target"
        );

        let cycles_to_do = native_target_cycle - self.current_cycle;
        self.current_cycle = native_target_cycle;
        cycles_to_do
    }
}

/// Virtual clock of a CPU, with the remaining subcycles of its current
/// instruction preserved across catch-ups.
pub struct SyncCpuState {
    pub current_cycle: u32,
    pub cycle_countdown: u32,
}

impl Default for SyncCpuState {
    fn default() -> Self {
        SyncCpuState {
            current_cycle: 0,
            cycle_countdown: 0,
        }
    }
}

/// Per-device virtual clocks. Cycle counters restart from zero at each
/// frame, which keeps every timestamp comfortably inside 32 bits; the
/// instruction countdowns carry over.
#[derive(Default)]
pub struct SyncSet {
    pub m68k: SyncCpuState,
    pub z80: SyncCpuState,
    pub mcd_m68k: SyncCpuState,
    pub fm: SyncState,
    pub psg: SyncState,
    pub pcm: SyncState,
    pub io_ports: [SyncState; 3],
}

impl SyncSet {
    pub fn begin_frame(&mut self) {
        self.m68k.current_cycle = 0;
        self.z80.current_cycle = 0;
        self.mcd_m68k.current_cycle = 0;
        self.fm.current_cycle = 0;
        self.psg.current_cycle = 0;
        self.pcm.current_cycle = 0;
        for io_port in self.io_ports.iter_mut() {
            io_port.current_cycle = 0;
        }
    }
}

impl MegaDrive {
    pub(crate) fn sync_fm(&mut self, target_cycle: CycleMegaDrive) -> u8 {
        let frames = self
            .sync
            .fm
            .sync(target_cycle.0, M68K_CLOCK_DIVIDER * FM_SAMPLE_RATE_DIVIDER);

        if frames != 0 {
            let audio = self.audio.clone();
            let fm = &mut self.fm;
            audio
                .borrow_mut()
                .fm_audio_to_be_generated(frames as usize, &mut |buffer| fm.update(buffer));
        }

        self.fm.get_status()
    }

    pub(crate) fn sync_psg(&mut self, target_cycle: CycleMegaDrive) {
        let frames = self
            .sync
            .psg
            .sync(target_cycle.0, Z80_CLOCK_DIVIDER * PSG_SAMPLE_RATE_DIVIDER);

        if frames != 0 {
            let audio = self.audio.clone();
            let psg = &mut self.psg;
            audio
                .borrow_mut()
                .psg_audio_to_be_generated(frames as usize, &mut |buffer| psg.update(buffer));
        }
    }

    pub(crate) fn sync_pcm(&mut self, target_cycle: CycleMegaCd) {
        let frames = self.sync.pcm.sync(
            target_cycle.0,
            MCD_M68K_CLOCK_DIVIDER * PCM_SAMPLE_RATE_DIVIDER,
        );

        if frames != 0 {
            let audio = self.audio.clone();
            let pcm = &mut self.pcm;
            audio
                .borrow_mut()
                .pcm_audio_to_be_generated(frames as usize, &mut |buffer| pcm.update(buffer));
        }
    }

    pub(crate) fn sync_cdda(&mut self, total_frames: usize) {
        let audio = self.audio.clone();
        let cd = self.cd.clone();
        let cdda = &mut self.mega_cd.cdda;

        audio
            .borrow_mut()
            .cdda_audio_to_be_generated(total_frames, &mut |buffer| {
                let total_frames = buffer.len() / 2;
                let mut total_frames_done = 0;

                if cdda.playing {
                    // Read samples until the end of either the disc data
                    // or the output buffer.
                    loop {
                        let frames_done = cd
                            .borrow_mut()
                            .audio_read(&mut buffer[total_frames_done * 2..total_frames * 2]);

                        total_frames_done += frames_done;

                        if frames_done == 0 || total_frames_done == total_frames {
                            break;
                        }

                        if cdda.repeating {
                            cd.borrow_mut().track_seeked(cdda.current_track);
                        } else {
                            cdda.playing = false;
                            break;
                        }
                    }
                }

                // Clear whatever could not be read from the disc.
                for sample in buffer[total_frames_done * 2..].iter_mut() {
                    *sample = 0;
                }
            });
    }

    pub(crate) fn sync_io_port(&mut self, port: usize, target_cycle: CycleMegaDrive) {
        // Accesses can arrive out of order through the Z80's window into
        // the main bus; a port that is already ahead stays where it is.
        let state = &mut self.sync.io_ports[port];
        if target_cycle.0 / M68K_CLOCK_DIVIDER >= state.current_cycle {
            state.sync(target_cycle.0, M68K_CLOCK_DIVIDER);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_is_monotonic() {
        let mut previous = 0;
        for cycle in (0..100_000_000u32).step_by(997) {
            let converted = CycleMegaDrive(cycle).to_mega_cd(TvStandard::Ntsc).0;
            assert!(converted >= previous);
            previous = converted;
        }
    }

    #[test]
    fn conversion_round_trip_never_overshoots() {
        for &tv_standard in [TvStandard::Ntsc, TvStandard::Pal].iter() {
            for cycle in (0..200_000_000u32).step_by(7919) {
                let there = CycleMegaDrive(cycle).to_mega_cd(tv_standard);
                let back = there.to_mega_drive(tv_standard).0;
                assert!(back <= cycle, "cycle {} came back as {}", cycle, back);
            }
        }
    }

    #[test]
    fn conversion_matches_clock_ratio() {
        // 53,693,175 Hz scaled to 50,000,000 Hz.
        let converted = CycleMegaDrive(53_693_175).to_mega_cd(TvStandard::Ntsc).0;
        let error = (i64::from(converted) - 50_000_000i64).abs();
        assert!(error < 2_000, "error {}", error);
    }

    #[test]
    fn sync_state_returns_native_delta() {
        let mut state = SyncState::default();
        assert_eq!(10, state.sync(70, 7));
        assert_eq!(10, state.current_cycle);
        assert_eq!(0, state.sync(75, 7));
        assert_eq!(4, state.sync(100, 7));
    }

    #[test]
    #[should_panic]
    fn sync_state_rejects_backwards_target() {
        let mut state = SyncState::default();
        state.sync(700, 7);
        state.sync(70, 7);
    }
}
