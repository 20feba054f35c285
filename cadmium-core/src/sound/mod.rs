// This file is part of cadmium.
// Copyright (c) 2016-2019 Sebastian Jastrzebski. All rights reserved.
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

mod fm;
mod fm_channel;
mod fm_operator;
mod pcm;
mod psg;

pub use self::fm::{Fm, FmConfig};
pub use self::fm_channel::FmChannel;
pub use self::fm_operator::FmOperatorConstant;
pub use self::pcm::Pcm;
pub use self::psg::{Psg, PsgConfig, PsgConstant};
