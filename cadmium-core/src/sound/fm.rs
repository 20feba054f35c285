// This file is part of cadmium.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::rc::Rc;

use bit_field::BitField;
use log::Level;

use super::fm_channel::FmChannel;
use super::fm_operator::FmOperatorConstant;

// SPEC: http://gendev.spritesmind.net/forum/viewtopic.php?p=5958#p5958

/// 8 is chosen because there are 6 FM channels (of which the DAC can
/// replace one) as well as the PSG. The PSG with all of its channels at
/// maximum volume reaches the volume of a single FM channel at maximum.
/// Technically, this means that 7 is a more appropriate number than 8,
/// but dividing by 8 is simpler.
const VOLUME_DIVIDER: i32 = 8;

#[derive(Clone, Default)]
pub struct FmConfig {
    pub fm_channels_disabled: [bool; 6],
    pub dac_channel_disabled: bool,
}

struct ChannelMetadata {
    state: FmChannel,
    cached_upper_frequency_bits: u8,
    pan_left: bool,
    pan_right: bool,
}

impl ChannelMetadata {
    fn new() -> Self {
        ChannelMetadata {
            state: FmChannel::new(),
            cached_upper_frequency_bits: 0,
            // Panning must be enabled by default; without this, Sonic 1's
            // 'Sega' chant doesn't play.
            pan_left: true,
            pan_right: true,
        }
    }
}

pub struct Fm {
    // Dependencies
    config: FmConfig,
    constant: Rc<FmOperatorConstant>,
    // Runtime State
    channels: [ChannelMetadata; 6],
    port: usize,
    address: u8,
    dac_sample: i32,
    dac_enabled: bool,
}

impl Fm {
    pub fn new(config: FmConfig, constant: Rc<FmOperatorConstant>) -> Self {
        info!(target: "sound", "Initializing FM");
        Fm {
            config,
            constant,
            channels: [
                ChannelMetadata::new(),
                ChannelMetadata::new(),
                ChannelMetadata::new(),
                ChannelMetadata::new(),
                ChannelMetadata::new(),
                ChannelMetadata::new(),
            ],
            port: 0,
            address: 0,
            dac_sample: 0,
            dac_enabled: false,
        }
    }

    pub fn reset(&mut self) {
        for channel in self.channels.iter_mut() {
            *channel = ChannelMetadata::new();
        }
        self.port = 0;
        self.address = 0;
        self.dac_sample = 0;
        self.dac_enabled = false;
    }

    /// Timer and busy flags are not modelled, so the status byte reads
    /// as idle.
    pub fn get_status(&self) -> u8 {
        0
    }

    /// First half of the two-step register write protocol: latch the port
    /// and address. The port is stored as the channel-block offset.
    pub fn do_address(&mut self, port: usize, address: u8) {
        self.port = port * 3;
        self.address = address;
    }

    /// Second half of the two-step register write protocol: commit data
    /// to the latched register.
    pub fn do_data(&mut self, data: u8) {
        if log_enabled!(Level::Trace) {
            trace!(target: "fm::reg", "Write 0x{:02x} = 0x{:02x}", self.address, data);
        }
        if self.address < 0x30 {
            if self.port == 0 {
                match self.address {
                    0x22 | 0x24 | 0x25 | 0x26 | 0x27 => (),
                    0x28 => {
                        // Key on/off. There's a gap between channels 3
                        // and 4.
                        const CHANNELS: [usize; 8] = [0, 1, 2, 0, 3, 4, 5, 0];
                        let channel = &mut self.channels[CHANNELS[(data & 7) as usize]].state;
                        channel.set_key_on(0, data.get_bit(4));
                        channel.set_key_on(2, data.get_bit(5));
                        channel.set_key_on(1, data.get_bit(6));
                        channel.set_key_on(3, data.get_bit(7));
                    }
                    0x2a => {
                        // DAC sample: convert unsigned 8-bit PCM to
                        // pre-centred signed 16-bit PCM.
                        self.dac_sample = (i32::from(data) - 0x80) * (0x100 / VOLUME_DIVIDER);
                    }
                    0x2b => {
                        self.dac_enabled = data.get_bit(7);
                    }
                    _ => {
                        warn!(target: "fm::reg", "Unrecognised FM address latched (0x{:02x})", self.address);
                    }
                }
            }
        } else {
            let channel_index = (self.address & 3) as usize;

            // There is no fourth channel per slot.
            if channel_index == 3 {
                return;
            }

            let channel = &mut self.channels[self.port + channel_index];

            if self.address < 0xa0 {
                // Per-operator.
                let operator_index = ((self.address >> 2) & 3) as usize;

                match self.address / 0x10 {
                    0x3 => {
                        channel
                            .state
                            .set_detune_and_multiplier(operator_index, (data >> 4) & 7, data & 0xf);
                    }
                    0x4 => {
                        channel.state.set_total_level(operator_index, data & 0x7f);
                    }
                    0x5 => {
                        channel
                            .state
                            .set_key_scale_and_attack_rate(operator_index, (data >> 6) & 3, data & 0x1f);
                    }
                    0x6 => {
                        // Amplitude modulation enable is not modelled.
                        channel.state.set_decay_rate(operator_index, data & 0x1f);
                    }
                    0x7 => {
                        channel.state.set_sustain_rate(operator_index, data & 0x1f);
                    }
                    0x8 => {
                        channel
                            .state
                            .set_sustain_level_and_release_rate(operator_index, (data >> 4) & 0xf, data & 0xf);
                    }
                    0x9 => {
                        // SSG-EG is not modelled.
                    }
                    _ => {
                        warn!(target: "fm::reg", "Unrecognised FM address latched (0x{:02x})", self.address);
                    }
                }
            } else {
                // Per-channel.
                match self.address / 4 {
                    0x2a | 0x2b => (),
                    0x28 => {
                        // Frequency low bits.
                        let frequency = u16::from(data)
                            | (u16::from(channel.cached_upper_frequency_bits) << 8);
                        channel.state.set_frequency(frequency);
                    }
                    0x29 => {
                        // Frequency high bits are latched without
                        // committing.
                        channel.cached_upper_frequency_bits = data & 0x3f;
                    }
                    0x2c => {
                        channel
                            .state
                            .set_feedback_and_algorithm((data >> 3) & 7, data & 7);
                    }
                    0x2d => {
                        // Panning; AMS and FMS are not modelled.
                        channel.pan_left = data.get_bit(7);
                        channel.pan_right = data.get_bit(6);
                    }
                    _ => {
                        warn!(target: "fm::reg", "Unrecognised FM address latched (0x{:02x})", self.address);
                    }
                }
            }
        }
    }

    /// Generates `buffer.len() / 2` frames of audio and mixes them into
    /// the caller-supplied stereo buffer.
    pub fn update(&mut self, buffer: &mut [i16]) {
        for channel_index in 0..self.channels.len() {
            let muted = self.config.fm_channels_disabled[channel_index];
            let channel = &mut self.channels[channel_index];

            // These masks are used in boolean algebra below, to avoid
            // branches in the mixing loop.
            let left_mask: i32 = if channel.pan_left { -1 } else { 0 };
            let right_mask: i32 = if channel.pan_right { -1 } else { 0 };
            let dac_mask: i32 = if channel_index == 5 && self.dac_enabled && !self.config.dac_channel_disabled {
                -1
            } else {
                0
            };

            for frame in buffer.chunks_exact_mut(2) {
                // The FM sample is 16-bit, so divide it down to be mixed
                // with the other five FM channels and the PSG without
                // clipping.
                let fm_sample = channel.state.get_sample(&self.constant) / VOLUME_DIVIDER;

                // Select either the FM sample or the DAC sample.
                let sample = (fm_sample & !dac_mask) | (self.dac_sample & dac_mask);

                if !muted {
                    frame[0] = frame[0].wrapping_add((sample & left_mask) as i16);
                    frame[1] = frame[1].wrapping_add((sample & right_mask) as i16);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_fm() -> Fm {
        Fm::new(FmConfig::default(), Rc::new(FmOperatorConstant::new()))
    }

    fn setup_fm_with_config(config: FmConfig) -> Fm {
        Fm::new(config, Rc::new(FmOperatorConstant::new()))
    }

    #[test]
    fn write_detune_and_multiplier() {
        let mut fm = setup_fm();
        fm.do_address(0, 0x34);
        fm.do_data(0x71);
        let operator = &fm.channels[0].state.operators[1];
        assert_eq!(7, operator.detune);
        assert_eq!(1, operator.multiplier);
    }

    #[test]
    fn write_total_level() {
        let mut fm = setup_fm();
        fm.do_address(0, 0x40);
        fm.do_data(0xff);
        assert_eq!(0x7f, fm.channels[0].state.operators[0].total_level);
    }

    #[test]
    fn write_total_level_second_port() {
        let mut fm = setup_fm();
        fm.do_address(1, 0x41);
        fm.do_data(0x33);
        assert_eq!(0x33, fm.channels[4].state.operators[0].total_level);
    }

    #[test]
    fn write_envelope_registers() {
        let mut fm = setup_fm();
        fm.do_address(0, 0x50);
        fm.do_data(0xdf);
        assert_eq!(3, fm.channels[0].state.operators[0].key_scale);
        assert_eq!(0x1f, fm.channels[0].state.operators[0].attack_rate);
        fm.do_address(0, 0x60);
        fm.do_data(0x1c);
        assert_eq!(0x1c, fm.channels[0].state.operators[0].decay_rate);
        fm.do_address(0, 0x70);
        fm.do_data(0x0a);
        assert_eq!(0x0a, fm.channels[0].state.operators[0].sustain_rate);
        fm.do_address(0, 0x80);
        fm.do_data(0xa5);
        assert_eq!(0xa, fm.channels[0].state.operators[0].sustain_level);
        assert_eq!(0x5, fm.channels[0].state.operators[0].release_rate);
    }

    #[test]
    fn key_on_remaps_operator_order() {
        let mut fm = setup_fm();
        fm.do_address(0, 0x28);
        fm.do_data(0x20 | 0x04); // operator bit 5, channel 4
        let operators = &fm.channels[3].state.operators;
        assert_eq!(false, operators[0].key_on);
        assert_eq!(false, operators[1].key_on);
        assert_eq!(true, operators[2].key_on);
        assert_eq!(false, operators[3].key_on);
    }

    #[test]
    fn frequency_high_bits_are_latched() {
        let mut fm = setup_fm();
        fm.do_address(0, 0xa4);
        fm.do_data(0x22);
        fm.do_address(0, 0xa0);
        fm.do_data(0xff);
        // 0x22ff committed on the low write.
        assert_eq!(0x22, fm.channels[0].cached_upper_frequency_bits);
    }

    #[test]
    fn panning_decodes_from_register_b4() {
        let mut fm = setup_fm();
        fm.do_address(0, 0xb4);
        fm.do_data(0x80);
        assert_eq!(true, fm.channels[0].pan_left);
        assert_eq!(false, fm.channels[0].pan_right);
    }

    #[test]
    fn dac_substitutes_channel_6() {
        let mut config = FmConfig::default();
        for i in 0..5 {
            config.fm_channels_disabled[i] = true;
        }
        let mut fm = setup_fm_with_config(config);
        fm.do_address(0, 0x2b);
        fm.do_data(0x80);
        fm.do_address(0, 0x2a);
        fm.do_data(0xc0);
        let mut buffer = [0i16; 8];
        fm.update(&mut buffer);
        // (0xc0 - 0x80) * 0x20 on both sides of every frame.
        for &sample in buffer.iter() {
            assert_eq!(0x800, sample);
        }
    }

    #[test]
    fn dac_disable_restores_fm_output() {
        let mut fm = setup_fm();
        fm.do_address(0, 0x2b);
        fm.do_data(0x80);
        fm.do_address(0, 0x2a);
        fm.do_data(0xff);
        fm.do_address(0, 0x2b);
        fm.do_data(0x00);
        assert_eq!(false, fm.dac_enabled);
    }
}
