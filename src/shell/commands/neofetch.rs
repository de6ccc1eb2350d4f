use crate::println;

const LOGO: &str = r#"
            .       
           / \      
          /   \     
    .----' .+. '----.
    |  _.-' | '-._  |
    '-'  ___+___  '-'
      .-'  (*)  '-.  
   .-' .---/ \---. '-.
  /  .-'   | |   '-. \
 | .'   .--+-+--.   '.| 
 |/  .-'   | |   '-. \|
  '-'  '---+-+---'  '-'
       '---/ \---'   
          \ /       
           '        
"#;

pub fn run(_args: &str) {
    println!("        Vespera x86_64");
    println!("  ========================");
    println!("{}", LOGO);
    println!("  OS:       Vespera 0.1.0");
    println!("  Arch:     x86_64");
    println!("  Kernel:   Rust (no_std)");
    println!("  Shell:    VesperaTTY v1");
    println!("  Memory:   Heap (Bump Alloc)");
    println!("  Drivers:  PS/2 KB + Mouse");
    println!("  Display:  VGA Text 80x25");
}
