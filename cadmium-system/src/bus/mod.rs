// This file is part of cadmium.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

mod main;
mod sub;
mod sync;
mod z80;

pub(crate) use self::main::MainBus;
pub(crate) use self::sub::SubBus;
pub(crate) use self::z80::Z80Bus;
pub use self::sync::{
    CycleMegaCd, CycleMegaDrive, SyncCpuState, SyncSet, SyncState, FM_SAMPLE_RATE_DIVIDER,
    M68K_CLOCK_DIVIDER, MCD_M68K_CLOCK_DIVIDER, PCM_SAMPLE_RATE_DIVIDER, PSG_SAMPLE_RATE_DIVIDER,
    Z80_CLOCK_DIVIDER,
};
