// This file is part of cadmium.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use cadmium_core::factory::BusZ80;

use crate::system::MegaDrive;

use super::sync::{CycleMegaDrive, Z80_CLOCK_DIVIDER};

/// Bus view handed to the Z80 core for the duration of one instruction.
pub(crate) struct Z80Bus<'a> {
    pub machine: &'a mut MegaDrive,
}

impl BusZ80 for Z80Bus<'_> {
    fn read(&mut self, address: u16) -> u8 {
        let target_cycle = CycleMegaDrive(self.machine.sync.z80.current_cycle);
        self.machine.z80_read_with_cycle(address, target_cycle)
    }

    fn write(&mut self, address: u16, value: u8) {
        let target_cycle = CycleMegaDrive(self.machine.sync.z80.current_cycle);
        self.machine.z80_write_with_cycle(address, value, target_cycle)
    }
}

impl MegaDrive {
    /// Advances the Z80 to the target cycle. While the bus is requested
    /// or the reset line is held, time passes without instructions being
    /// executed.
    pub(crate) fn sync_z80(&mut self, target_cycle: CycleMegaDrive) {
        if target_cycle.0 <= self.sync.z80.current_cycle {
            return;
        }

        let cpu = self.z80.clone();
        let mut cpu = cpu.borrow_mut();

        let mut countdown = self.sync.z80.cycle_countdown;

        while self.sync.z80.current_cycle < target_cycle.0 {
            let cycles_to_do = countdown.min(target_cycle.0 - self.sync.z80.current_cycle);

            self.sync.z80.current_cycle += cycles_to_do;
            countdown -= cycles_to_do;

            if countdown == 0 {
                let z80_not_running =
                    self.z80_control.bus_requested || self.z80_control.reset_held;

                let instruction_cycles = if z80_not_running {
                    1
                } else {
                    cpu.do_cycle(&mut Z80Bus { machine: &mut *self })
                };

                countdown = Z80_CLOCK_DIVIDER * instruction_cycles;
            }
        }

        self.sync.z80.cycle_countdown = countdown;
    }

    pub(crate) fn z80_read_with_cycle(&mut self, address: u16, target_cycle: CycleMegaDrive) -> u8 {
        match address {
            0x0000..=0x1fff => self.z80_ram[usize::from(address)],
            0x4000..=0x4003 => {
                // FM status
                self.sync_fm(target_cycle)
            }
            0x6000 | 0x6001 => {
                // The bank register reads back as nothing useful.
                0
            }
            0x7f11 => {
                // The PSG is write-only.
                0
            }
            0x8000..=0xffff => {
                // Window into the main CPU's address space.
                let m68k_address =
                    u32::from(self.z80_control.bank) * 0x8000 + u32::from(address & 0x7ffe);

                self.sync_m68k(target_cycle);

                if address & 1 != 0 {
                    (self.m68k_read_with_cycle(m68k_address / 2, false, true, target_cycle, false)
                        & 0xff) as u8
                } else {
                    (self.m68k_read_with_cycle(m68k_address / 2, true, false, target_cycle, false)
                        >> 8) as u8
                }
            }
            _ => {
                warn!(target: "bus::z80", "Attempted to read invalid Z80 address 0x{:x}", address);
                0
            }
        }
    }

    pub(crate) fn z80_write_with_cycle(
        &mut self,
        address: u16,
        value: u8,
        target_cycle: CycleMegaDrive,
    ) {
        match address {
            0x0000..=0x1fff => {
                self.z80_ram[usize::from(address)] = value;
            }
            0x4000..=0x4003 => {
                // FM address/data ports
                let port = if address & 2 != 0 { 1 } else { 0 };

                self.sync_fm(target_cycle);

                if address & 1 == 0 {
                    self.fm.do_address(port, value);
                } else {
                    self.fm.do_data(value);
                }
            }
            0x6000 | 0x6001 => {
                // One bit of the 9-bit bank register is shifted in per
                // write.
                self.z80_control.bank >>= 1;
                self.z80_control.bank |= if value & 1 != 0 { 0x100 } else { 0 };
            }
            0x7f11 => {
                // PSG, accessed through the main CPU's bus.
                self.sync_m68k(target_cycle);
                self.m68k_write_with_cycle(0xc00010 / 2, false, true, u16::from(value), target_cycle);
            }
            0x8000..=0xffff => {
                // Window into the main CPU's address space.
                let m68k_address =
                    u32::from(self.z80_control.bank) * 0x8000 + u32::from(address & 0x7ffe);

                self.sync_m68k(target_cycle);

                if address & 1 != 0 {
                    self.m68k_write_with_cycle(
                        m68k_address / 2,
                        false,
                        true,
                        u16::from(value),
                        target_cycle,
                    );
                } else {
                    self.m68k_write_with_cycle(
                        m68k_address / 2,
                        true,
                        false,
                        u16::from(value) << 8,
                        target_cycle,
                    );
                }
            }
            _ => {
                warn!(target: "bus::z80", "Attempted to write invalid Z80 address 0x{:x}", address);
            }
        }
    }
}
