// SPDX-License-Identifier: Apache-2.0

//! RP2040 ADC + DMA back-end programmed through the PAC registers.
//!
//! Block captures run the ADC free-running into its FIFO and let one DMA channel move
//! `count` half-words from the FIFO into a `'static` buffer, paced by the ADC DREQ. Nothing
//! here blocks for longer than one conversion.

use core::sync::atomic::{compiler_fence, Ordering};

use rp2040_hal::pac;

use crate::{error::Error, source::AdcDma};

/// DREQ number of the ADC FIFO
const DREQ_ADC: u8 = 36;
/// Spins allowed for one conversion (96 ADC cycles) or one channel abort
const READY_SPINS: u32 = 10_000;

/// ADC and one DMA channel, plus the capture destination.
pub struct Rp2040AdcDma<const N: usize> {
    /// ADC block
    adc: pac::ADC,
    /// DMA block; only `channel` is touched
    dma: pac::DMA,
    /// DMA channel used for captures
    channel: usize,
    /// Capture destination, allocated once at start-up
    buffer: &'static mut [u16; N],
    /// Depth of the transfer in flight or last completed
    armed: Option<usize>,
}

impl<const N: usize> Rp2040AdcDma<N> {
    /// Bring the ADC and DMA out of reset, power the ADC and take ownership.
    ///
    /// The analog pin must already be configured, e.g. with [`rp2040_hal::adc::AdcPin`].
    pub fn new(
        adc: pac::ADC,
        dma: pac::DMA,
        channel: usize,
        buffer: &'static mut [u16; N],
        resets: &mut pac::RESETS,
    ) -> Self {
        resets
            .reset()
            .modify(|_, w| w.adc().clear_bit().dma().clear_bit());
        while resets.reset_done().read().adc().bit_is_clear()
            || resets.reset_done().read().dma().bit_is_clear()
        {}

        adc.cs().write(|w| w.en().set_bit());
        while adc.cs().read().ready().bit_is_clear() {}
        debug!("ADC powered, DMA channel {} reserved", channel);

        Self {
            adc,
            dma,
            channel,
            buffer,
            armed: None,
        }
    }

    /// Registers of the capture channel
    fn ch(&self) -> &pac::dma::CH {
        self.dma.ch(self.channel)
    }

    /// Pause free-running conversions and detach the FIFO from DMA
    fn pause(&self) {
        self.adc.cs().modify(|_, w| w.start_many().clear_bit());
        self.adc
            .fcs()
            .modify(|_, w| w.en().clear_bit().dreq_en().clear_bit());
    }

    /// Discard stale FIFO contents
    fn flush_fifo(&self) {
        while self.adc.fcs().read().empty().bit_is_clear() {
            let _ = self.adc.fifo().read();
        }
    }
}

impl<const N: usize> AdcDma for Rp2040AdcDma<N> {
    fn configure(&mut self, channel: u8, clock_divisor: u16) {
        self.adc
            .cs()
            .modify(|_, w| unsafe { w.ainsel().bits(channel) });
        self.adc
            .div()
            .write(|w| unsafe { w.int().bits(clock_divisor).frac().bits(0) });
    }

    fn read_single(&mut self) -> Result<u16, Error> {
        self.adc.cs().modify(|_, w| w.start_once().set_bit());
        for _ in 0..READY_SPINS {
            let cs = self.adc.cs().read();
            if cs.ready().bit_is_set() {
                if cs.err().bit_is_set() {
                    return Err(Error::Hardware);
                }
                return Ok(self.adc.result().read().result().bits());
            }
        }
        Err(Error::Hardware)
    }

    fn start_capture(&mut self, count: usize) -> Result<(), Error> {
        if count == 0 || count > N {
            return Err(Error::InvalidConfig);
        }
        if self.ch().ch_ctrl_trig().read().busy().bit_is_set() {
            return Err(Error::HardwareBusy);
        }

        self.pause();
        self.flush_fifo();
        // 12-bit results, one DREQ per sample
        self.adc.fcs().write(|w| unsafe {
            w.en()
                .set_bit()
                .dreq_en()
                .set_bit()
                .thresh()
                .bits(1)
                .shift()
                .clear_bit()
        });

        let read_addr = self.adc.fifo().as_ptr() as u32;
        let write_addr = self.buffer.as_mut_ptr() as u32;
        let channel = self.channel as u8;
        let ch = self.ch();
        ch.ch_read_addr().write(|w| unsafe { w.bits(read_addr) });
        ch.ch_write_addr().write(|w| unsafe { w.bits(write_addr) });
        ch.ch_trans_count().write(|w| unsafe { w.bits(count as u32) });
        compiler_fence(Ordering::SeqCst);
        ch.ch_ctrl_trig().write(|w| unsafe {
            w.data_size()
                .size_halfword()
                .incr_read()
                .clear_bit()
                .incr_write()
                .set_bit()
                .treq_sel()
                .bits(DREQ_ADC)
                .chain_to()
                .bits(channel)
                .en()
                .set_bit()
        });

        self.adc.cs().modify(|_, w| w.start_many().set_bit());
        self.armed = Some(count);
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.armed.is_some() && self.ch().ch_ctrl_trig().read().busy().bit_is_clear()
    }

    fn stop(&mut self) {
        self.pause();
        self.dma
            .chan_abort()
            .write(|w| unsafe { w.bits(1 << self.channel) });
        let mut spins = 0;
        while self.dma.chan_abort().read().bits() != 0 && spins < READY_SPINS {
            spins += 1;
        }
        if spins == READY_SPINS {
            warn!("DMA channel {} did not acknowledge abort", self.channel);
        }
        self.flush_fifo();
        self.armed = None;
    }

    fn captured(&self) -> Result<&[u16], Error> {
        let count = self.armed.ok_or(Error::NotReady)?;
        self.pause();
        let ctrl = self.ch().ch_ctrl_trig().read();
        if ctrl.read_error().bit_is_set() || ctrl.write_error().bit_is_set() {
            return Err(Error::Hardware);
        }
        compiler_fence(Ordering::SeqCst);
        Ok(&self.buffer[..count])
    }
}
