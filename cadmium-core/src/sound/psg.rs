// This file is part of cadmium.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::rc::Rc;

use bit_field::BitField;
use log::Level;

// SPEC: https://www.smspower.org/Development/SN76489

#[derive(Clone, Default)]
pub struct PsgConfig {
    pub tone_disabled: [bool; 3],
    pub noise_disabled: bool,
}

/// Attenuation-to-amplitude table: each volume level is 2 decibels lower
/// than the last, and level 15 is silence. Entries come in positive and
/// negative phase.
pub struct PsgConstant {
    volumes: [[i16; 2]; 0x10],
}

impl PsgConstant {
    pub fn new() -> Self {
        let mut volumes = [[0; 2]; 0x10];
        for (i, entry) in volumes.iter_mut().enumerate().take(0xf) {
            // The PSG at full volume is a quarter of the 16-bit range, so
            // that it can be mixed with the FM channels without clipping.
            let volume = (f32::from(i16::max_value()) / 4.0) * 10f32.powf(-2.0 * i as f32 / 20.0);
            entry[0] = volume as i16;
            entry[1] = -(volume as i16);
        }
        PsgConstant { volumes }
    }
}

impl Default for PsgConstant {
    fn default() -> Self {
        Self::new()
    }
}

struct ToneState {
    /// Countdown until the phase changes.
    countdown: u16,
    /// Value the countdown is reset to when it expires.
    countdown_master: u16,
    attenuation: u8,
    /// 0 for the positive phase, 1 for the negative phase.
    output_bit: u8,
}

struct NoiseState {
    /// Countdown until the fake output bit alternates.
    countdown: u16,
    attenuation: u8,
    /// The shift register is rotated when this bit goes from low to high.
    fake_output_bit: bool,
    real_output_bit: u8,
    /// Selects the countdown reload: 0x10, 0x20, 0x40, or the last tone
    /// channel's reload value.
    frequency_mode: u8,
    white_noise_mode: bool,
    /// Rotating bitfield which is used to produce noise.
    shift_register: u16,
}

struct LatchedCommand {
    /// 0-2 are the tone channels, 3 is the noise channel.
    channel: u8,
    is_volume_command: bool,
}

pub struct Psg {
    // Dependencies
    config: PsgConfig,
    constant: Rc<PsgConstant>,
    // Runtime State
    tones: [ToneState; 3],
    noise: NoiseState,
    latched_command: LatchedCommand,
}

impl Psg {
    pub fn new(config: PsgConfig, constant: Rc<PsgConstant>) -> Self {
        info!(target: "sound", "Initializing PSG");
        Psg {
            config,
            constant,
            tones: [
                ToneState {
                    countdown: 0,
                    countdown_master: 0,
                    attenuation: 0xf,
                    output_bit: 0,
                },
                ToneState {
                    countdown: 0,
                    countdown_master: 0,
                    attenuation: 0xf,
                    output_bit: 0,
                },
                ToneState {
                    countdown: 0,
                    countdown_master: 0,
                    attenuation: 0xf,
                    output_bit: 0,
                },
            ],
            noise: NoiseState {
                countdown: 0,
                attenuation: 0xf,
                fake_output_bit: false,
                real_output_bit: 0,
                frequency_mode: 0,
                white_noise_mode: false,
                shift_register: 0,
            },
            latched_command: LatchedCommand {
                channel: 0,
                is_volume_command: false,
            },
        }
    }

    pub fn reset(&mut self) {
        for tone in self.tones.iter_mut() {
            tone.countdown = 0;
            tone.countdown_master = 0;
            // Silence the channels on startup.
            tone.attenuation = 0xf;
            tone.output_bit = 0;
        }
        self.noise.countdown = 0;
        self.noise.attenuation = 0xf;
        self.noise.fake_output_bit = false;
        self.noise.real_output_bit = 0;
        self.noise.frequency_mode = 0;
        self.noise.white_noise_mode = false;
        self.noise.shift_register = 0;
        self.latched_command.channel = 0;
        self.latched_command.is_volume_command = false;
    }

    pub fn do_command(&mut self, command: u8) {
        if log_enabled!(Level::Trace) {
            trace!(target: "psg::reg", "Command 0x{:02x}", command);
        }

        let latch = command.get_bit(7);

        if latch {
            self.latched_command.channel = (command >> 5) & 3;
            self.latched_command.is_volume_command = command.get_bit(4);
        }

        if (self.latched_command.channel as usize) < self.tones.len() {
            // Tone channel.
            let tone = &mut self.tones[self.latched_command.channel as usize];

            if self.latched_command.is_volume_command {
                tone.attenuation = command & 0xf;
            } else if latch {
                // Low frequency bits.
                tone.countdown_master &= !0xf;
                tone.countdown_master |= u16::from(command & 0xf);
            } else {
                // High frequency bits.
                tone.countdown_master &= 0xf;
                tone.countdown_master |= u16::from(command & 0x3f) << 4;
            }
        } else {
            // Noise channel.
            if self.latched_command.is_volume_command {
                self.noise.attenuation = command & 0xf;
            } else {
                self.noise.white_noise_mode = command.get_bit(2);
                self.noise.frequency_mode = command & 3;

                // When the noise register is written to, the shift
                // register is reset so that all bits are zero except for
                // the lowest. This gives "periodic noise" a 1/16th duty
                // cycle, and also affects the sound of white noise.
                self.noise.shift_register = 1;
            }
        }
    }

    /// Generates `buffer.len()` mono frames and mixes them into the
    /// caller-supplied buffer.
    pub fn update(&mut self, buffer: &mut [i16]) {
        // Do the tone channels.
        for (i, tone) in self.tones.iter_mut().enumerate() {
            let muted = self.config.tone_disabled[i];

            for sample in buffer.iter_mut() {
                // This countdown is responsible for the channel's
                // frequency.
                if tone.countdown == 0 {
                    tone.countdown = tone.countdown_master;
                    // Switch from positive phase to negative phase and
                    // vice versa.
                    tone.output_bit ^= 1;
                } else {
                    tone.countdown -= 1;
                }

                if !muted {
                    *sample = sample.wrapping_add(
                        self.constant.volumes[tone.attenuation as usize][tone.output_bit as usize],
                    );
                }
            }
        }

        // Do the noise channel.
        for sample in buffer.iter_mut() {
            if self.noise.countdown == 0 {
                self.noise.countdown = match self.noise.frequency_mode {
                    0 => 0x10,
                    1 => 0x20,
                    2 => 0x40,
                    // Use the last tone channel's frequency.
                    _ => self.tones[self.tones.len() - 1].countdown_master,
                };

                self.noise.fake_output_bit = !self.noise.fake_output_bit;

                if self.noise.fake_output_bit {
                    // The noise channel maintains a 16-bit register whose
                    // bits are rotated every time the output bit goes
                    // from low to high. The bit rotated from the bottom
                    // to the top is what reaches the speaker. In white
                    // noise mode the new top bit is XOR'd with the bit
                    // third from the bottom.
                    self.noise.real_output_bit = ((self.noise.shift_register & 0x8000) >> 15) as u8;

                    self.noise.shift_register <<= 1;
                    self.noise.shift_register |= u16::from(self.noise.real_output_bit);

                    if self.noise.white_noise_mode {
                        self.noise.shift_register ^= (self.noise.shift_register & 0x2000) >> 13;
                    }
                }
            } else {
                self.noise.countdown -= 1;
            }

            if !self.config.noise_disabled {
                *sample = sample.wrapping_add(
                    self.constant.volumes[self.noise.attenuation as usize]
                        [self.noise.real_output_bit as usize],
                );
            }
        }
    }
}
