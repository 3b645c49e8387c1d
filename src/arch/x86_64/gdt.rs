/*
 * Global Descriptor Table (GDT) Implementation
 *
 * x86_64 uses a flat memory model where segmentation is largely unused, but
 * long mode still requires a GDT with a kernel code/data segment pair and a
 * TSS, the latter supplying the interrupt stack table entry the double
 * fault handler runs on. This kernel runs entirely in ring 0, so only those
 * three descriptors are present.
 */

use lazy_static::lazy_static;
use x86_64::{
    VirtAddr,
    structures::{
        gdt::{Descriptor, GlobalDescriptorTable, SegmentSelector},
        tss::TaskStateSegment,
    },
};

pub const DOUBLE_FAULT_IST_INDEX: u16 = 0;

lazy_static! {
    static ref TSS: TaskStateSegment = {
        let mut tss = TaskStateSegment::new();
        tss.interrupt_stack_table[DOUBLE_FAULT_IST_INDEX as usize] = {
            const STACK_SIZE: usize = 4096;
            static mut STACK: [u8; STACK_SIZE] = [0; STACK_SIZE];

            let stack_start = VirtAddr::from_ptr(&raw const STACK);
            let stack_end = stack_start + STACK_SIZE as u64;
            stack_end
        };
        tss
    };
}
lazy_static! {
    static ref GDT: (GlobalDescriptorTable, Selectors) = {
        let mut gdt = GlobalDescriptorTable::new();
        let code_selector = gdt.append(Descriptor::kernel_code_segment());
        let data_selector = gdt.append(Descriptor::kernel_data_segment());
        let tss_selector = gdt.append(Descriptor::tss_segment(&TSS));
        (
            gdt,
            Selectors {
                code_selector,
                data_selector,
                tss_selector,
            },
        )
    };
}

struct Selectors {
    code_selector: SegmentSelector,
    data_selector: SegmentSelector,
    tss_selector: SegmentSelector,
}

/// Initialize the Global Descriptor Table
///
/// This function sets up the GDT with kernel code segment and TSS.
/// Must be called before IDT initialization.
pub fn init() {
    use x86_64::instructions::{
        segmentation::{CS, DS, ES, SS, FS, GS, Segment},
        tables::load_tss,
    };

    log::info!("Loading GDT...");
    GDT.0.load();

    unsafe {
        log::info!("Setting segment registers...");
        // Reload CS to the new code segment
        CS::set_reg(GDT.1.code_selector);

        // CRITICAL: reload all data segments to the new data segment
        // This fixes the triple fault by ensuring all segment registers
        // point to valid descriptors in our new GDT
        DS::set_reg(GDT.1.data_selector);
        ES::set_reg(GDT.1.data_selector);
        SS::set_reg(GDT.1.data_selector);
        FS::set_reg(GDT.1.data_selector);
        GS::set_reg(GDT.1.data_selector);

        log::info!("Loading TSS...");
        load_tss(GDT.1.tss_selector);
    }

    log::info!("GDT initialized successfully");
}
