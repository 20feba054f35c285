// This file is part of cadmium.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use bit_field::BitField;
use log::Level;

pub mod reg {
    pub const VOLUME: u16 = 0x00;
    pub const PANNING: u16 = 0x01;
    pub const FREQUENCY_LOW: u16 = 0x02;
    pub const FREQUENCY_HIGH: u16 = 0x03;
    pub const LOOP_ADDRESS_LOW: u16 = 0x04;
    pub const LOOP_ADDRESS_HIGH: u16 = 0x05;
    pub const START_ADDRESS: u16 = 0x06;
    pub const CONTROL: u16 = 0x07;
    pub const CHANNEL_DISABLE: u16 = 0x08;
}

struct ChannelState {
    disabled: bool,
    volume: u8,
    panning: [u8; 2],
    frequency: u16,
    loop_address: u16,
    start_address: u8,
    /// 27-bit play address; the sample index is bits 11 and up.
    address: u32,
}

impl ChannelState {
    fn new() -> Self {
        ChannelState {
            disabled: true,
            volume: 0,
            panning: [0; 2],
            frequency: 0,
            loop_address: 0,
            start_address: 0,
            address: 0,
        }
    }
}

pub struct Pcm {
    channels: [ChannelState; 8],
    wave_ram: Vec<u8>,
    sounding: bool,
    current_wave_bank: u8,
    current_channel: u8,
}

impl Pcm {
    pub fn new() -> Self {
        info!(target: "sound", "Initializing PCM");
        Pcm {
            channels: [
                ChannelState::new(),
                ChannelState::new(),
                ChannelState::new(),
                ChannelState::new(),
                ChannelState::new(),
                ChannelState::new(),
                ChannelState::new(),
                ChannelState::new(),
            ],
            wave_ram: vec![0; 0x10000],
            sounding: false,
            current_wave_bank: 0,
            current_channel: 0,
        }
    }

    pub fn reset(&mut self) {
        for channel in self.channels.iter_mut() {
            *channel = ChannelState::new();
        }
        self.sounding = false;
        self.current_wave_bank = 0;
        self.current_channel = 0;
    }

    pub fn write_register(&mut self, reg: u16, value: u8) {
        if log_enabled!(Level::Trace) {
            trace!(target: "pcm::reg", "Write 0x{:02x} = 0x{:02x}", reg, value);
        }
        match reg {
            reg::VOLUME => {
                self.current_channel_mut().volume = value;
            }
            reg::PANNING => {
                let channel = self.current_channel_mut();
                channel.panning[0] = value & 0xf;
                channel.panning[1] = value >> 4;
            }
            reg::FREQUENCY_LOW => {
                let channel = self.current_channel_mut();
                channel.frequency = (channel.frequency & 0xff00) | u16::from(value);
            }
            reg::FREQUENCY_HIGH => {
                let channel = self.current_channel_mut();
                channel.frequency = (channel.frequency & 0x00ff) | (u16::from(value) << 8);
            }
            reg::LOOP_ADDRESS_LOW => {
                let channel = self.current_channel_mut();
                channel.loop_address = (channel.loop_address & 0xff00) | u16::from(value);
            }
            reg::LOOP_ADDRESS_HIGH => {
                let channel = self.current_channel_mut();
                channel.loop_address = (channel.loop_address & 0x00ff) | (u16::from(value) << 8);
            }
            reg::START_ADDRESS => {
                self.current_channel_mut().start_address = value;
            }
            reg::CONTROL => {
                self.sounding = value.get_bit(7);
                if value.get_bit(6) {
                    self.current_channel = value & 7;
                } else {
                    self.current_wave_bank = value & 0xf;
                }
            }
            reg::CHANNEL_DISABLE => {
                for (i, channel) in self.channels.iter_mut().enumerate() {
                    channel.disabled = (value >> i) & 1 != 0;
                }
            }
            _ => (),
        }
    }

    pub fn read_register(&self, reg: u16) -> u8 {
        match reg {
            reg::VOLUME => self.current_channel_ref().volume,
            reg::PANNING => {
                let channel = self.current_channel_ref();
                channel.panning[0] | (channel.panning[1] << 4)
            }
            reg::FREQUENCY_LOW => (self.current_channel_ref().frequency & 0xff) as u8,
            reg::FREQUENCY_HIGH => (self.current_channel_ref().frequency >> 8) as u8,
            reg::LOOP_ADDRESS_LOW => (self.current_channel_ref().loop_address & 0xff) as u8,
            reg::LOOP_ADDRESS_HIGH => (self.current_channel_ref().loop_address >> 8) as u8,
            reg::START_ADDRESS => self.current_channel_ref().start_address,
            reg::CHANNEL_DISABLE => {
                let mut value = 0;
                for (i, channel) in self.channels.iter().enumerate() {
                    value |= u8::from(channel.disabled) << i;
                }
                value
            }
            // Per-channel play address read-back, low then high byte.
            0x10..=0x1f => {
                let channel = &self.channels[((reg - 0x10) / 2) as usize];
                if reg & 1 == 0 {
                    ((channel.address >> 11) & 0xff) as u8
                } else {
                    ((channel.address >> 19) & 0xff) as u8
                }
            }
            _ => 0,
        }
    }

    /// Waveform writes land in the currently selected 4 KiB bank.
    pub fn write_wave_ram(&mut self, address: u16, value: u8) {
        let index = (usize::from(self.current_wave_bank) << 12) | usize::from(address & 0xfff);
        self.wave_ram[index] = value;
    }

    fn current_channel_mut(&mut self) -> &mut ChannelState {
        &mut self.channels[self.current_channel as usize]
    }

    fn current_channel_ref(&self) -> &ChannelState {
        &self.channels[self.current_channel as usize]
    }

    fn fetch_sample(wave_ram: &[u8], channel: &ChannelState) -> u8 {
        wave_ram[((channel.address >> 11) & 0xffff) as usize]
    }

    fn is_channel_audible(sounding: bool, channel: &ChannelState) -> bool {
        !channel.disabled && sounding
    }

    fn update_address_and_fetch_sample(
        wave_ram: &[u8],
        sounding: bool,
        channel: &mut ChannelState,
    ) -> u8 {
        if !Self::is_channel_audible(sounding, channel) {
            // Silent channels still park their pointer at the start
            // address.
            channel.address = u32::from(channel.start_address) << 19;
            Self::fetch_sample(wave_ram, channel)
        } else {
            channel.address = (channel.address + u32::from(channel.frequency)) & 0x7ff_ffff;
            let wave_value = Self::fetch_sample(wave_ram, channel);

            // A sample of 0xff is a loop terminator.
            if wave_value == 0xff {
                channel.address = u32::from(channel.loop_address) << 11;
                Self::fetch_sample(wave_ram, channel)
            } else {
                wave_value
            }
        }
    }

    /// Samples are 10-bit unsigned around a bias of 0x200.
    fn unsigned_to_signed(sample: u32) -> i16 {
        let sign_bit_mask = 1 << (10 - 1);
        if sample & sign_bit_mask != 0 {
            (sample - sign_bit_mask) as i16
        } else {
            -((sign_bit_mask - sample) as i16)
        }
    }

    /// Generates `buffer.len() / 2` frames of audio and mixes them into
    /// the caller-supplied stereo buffer.
    pub fn update(&mut self, buffer: &mut [i16]) {
        for frame in buffer.chunks_exact_mut(2) {
            let mut mixed_samples: [u32; 2] = [0x8000, 0x8000];

            for channel in self.channels.iter_mut() {
                let sample =
                    Self::update_address_and_fetch_sample(&self.wave_ram, self.sounding, channel);

                if Self::is_channel_audible(self.sounding, channel) {
                    for (side, mixed_sample) in mixed_samples.iter_mut().enumerate() {
                        // Mask out the direction bit and apply volume and
                        // panning. Samples are signed-magnitude.
                        let absolute_sample = u32::from(sample & 0x7f);
                        let add = sample & 0x80 != 0;
                        let scaled_absolute_sample = (absolute_sample
                            * u32::from(channel.volume)
                            * u32::from(channel.panning[side]))
                            >> 5;

                        if add {
                            *mixed_sample = (*mixed_sample + scaled_absolute_sample).min(0xffff);
                        } else {
                            *mixed_sample = mixed_sample.saturating_sub(scaled_absolute_sample);
                        }
                    }
                }
            }

            for (side, &mixed_sample) in mixed_samples.iter().enumerate() {
                frame[side] =
                    frame[side].wrapping_add(Self::unsigned_to_signed(mixed_sample >> 6));
            }
        }
    }
}

impl Default for Pcm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_pcm() -> Pcm {
        let mut pcm = Pcm::new();
        pcm.reset();
        pcm
    }

    fn select_channel(pcm: &mut Pcm, channel: u8) {
        pcm.write_register(reg::CONTROL, 0x80 | 0x40 | channel);
    }

    #[test]
    fn register_round_trips() {
        let mut pcm = setup_pcm();
        select_channel(&mut pcm, 2);
        pcm.write_register(reg::VOLUME, 0xab);
        pcm.write_register(reg::PANNING, 0x5c);
        pcm.write_register(reg::FREQUENCY_LOW, 0x34);
        pcm.write_register(reg::FREQUENCY_HIGH, 0x12);
        pcm.write_register(reg::LOOP_ADDRESS_LOW, 0x78);
        pcm.write_register(reg::LOOP_ADDRESS_HIGH, 0x56);
        pcm.write_register(reg::START_ADDRESS, 0x9a);
        assert_eq!(0xab, pcm.read_register(reg::VOLUME));
        assert_eq!(0x5c, pcm.read_register(reg::PANNING));
        assert_eq!(0x34, pcm.read_register(reg::FREQUENCY_LOW));
        assert_eq!(0x12, pcm.read_register(reg::FREQUENCY_HIGH));
        assert_eq!(0x78, pcm.read_register(reg::LOOP_ADDRESS_LOW));
        assert_eq!(0x56, pcm.read_register(reg::LOOP_ADDRESS_HIGH));
        assert_eq!(0x9a, pcm.read_register(reg::START_ADDRESS));
    }

    #[test]
    fn control_selects_channel_or_bank() {
        let mut pcm = setup_pcm();
        pcm.write_register(reg::CONTROL, 0x40 | 5);
        assert_eq!(5, pcm.current_channel);
        pcm.write_register(reg::CONTROL, 0x80 | 0xc);
        assert_eq!(0xc, pcm.current_wave_bank);
        assert_eq!(true, pcm.sounding);
    }

    #[test]
    fn disable_mask_round_trips() {
        let mut pcm = setup_pcm();
        pcm.write_register(reg::CHANNEL_DISABLE, 0xa5);
        assert_eq!(0xa5, pcm.read_register(reg::CHANNEL_DISABLE));
    }

    #[test]
    fn wave_writes_land_in_selected_bank() {
        let mut pcm = setup_pcm();
        pcm.write_register(reg::CONTROL, 0x3);
        pcm.write_wave_ram(0x45, 0x77);
        assert_eq!(0x77, pcm.wave_ram[0x3045]);
    }

    #[test]
    fn silent_channel_parks_address_at_start() {
        let mut pcm = setup_pcm();
        select_channel(&mut pcm, 0);
        pcm.write_register(reg::START_ADDRESS, 0x12);
        pcm.write_register(reg::CHANNEL_DISABLE, 0xff);
        let mut buffer = [0i16; 2];
        pcm.update(&mut buffer);
        assert_eq!(u32::from(0x12u8) << 19, pcm.channels[0].address);
    }

    #[test]
    fn loop_terminator_rewinds_to_loop_address() {
        let mut pcm = setup_pcm();
        select_channel(&mut pcm, 0);
        pcm.write_register(reg::CHANNEL_DISABLE, 0xfe);
        pcm.write_register(reg::FREQUENCY_LOW, 0x00);
        pcm.write_register(reg::FREQUENCY_HIGH, 0x08); // one sample per frame
        pcm.write_register(reg::LOOP_ADDRESS_LOW, 0x10);
        pcm.write_register(reg::LOOP_ADDRESS_HIGH, 0x00);
        pcm.write_register(reg::VOLUME, 0xff);
        pcm.write_register(reg::PANNING, 0xff);
        // Sample 1 is the loop terminator; sample 0x10 is ordinary.
        pcm.wave_ram[1] = 0xff;
        pcm.wave_ram[0x10] = 0x81;
        let mut buffer = [0i16; 2];
        pcm.update(&mut buffer);
        assert_eq!(u32::from(0x10u16) << 11, pcm.channels[0].address);
        assert!(buffer[0] > 0);
    }

    #[test]
    fn centred_output_is_silent() {
        let mut pcm = setup_pcm();
        let mut buffer = [0i16; 8];
        pcm.update(&mut buffer);
        for &sample in buffer.iter() {
            assert_eq!(0, sample);
        }
    }
}
